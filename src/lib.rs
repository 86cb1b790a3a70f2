//! # bookscan
//!
//! Digitise scanned books with AI models: OCR page images through a vision
//! model, then translate the text into Chinese through a language model.
//!
//! ## Why this crate?
//!
//! Commentary books mix English prose with Greek and Hebrew scripture,
//! footnotes and chapter headings. Classic OCR mangles the scripture and
//! loses the structure. A vision model reads the page as a human would and
//! reports each part in tagged blocks, and the same book can then be
//! translated paragraph by paragraph with theology-aware prompts.
//!
//! Five vendors sit behind one [`AiProvider`] trait, so the scanner and the
//! translator never know which one they are talking to.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page images
//!  │
//!  ├─ 1. Provider  ProviderFactory: explicit options → env → .env → defaults
//!  ├─ 2. Scan      PageScanner: vision call per page, tagged reply parsed
//!  ├─ 3. Analyse   book structure, scripture pages merged
//!  └─ 4. Translate Translator: chat call per paragraph (+ footnotes)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bookscan::{load_page_images, PageScanner, ProviderFactory, ScanOptions};
//! use bookscan::{TranslateOptions, Translator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // AI_PROVIDER=gemini GEMINI_API_KEY=... or a .env file
//!     let provider = ProviderFactory::from_env()?;
//!
//!     let images = load_page_images("scans/").await?;
//!     let scanner = PageScanner::new(provider.clone(), ScanOptions::default());
//!     let pages = scanner.scan_pages(&images).await?;
//!
//!     let translator = Translator::new(provider, TranslateOptions::default());
//!     for section in translator.create_sections_from_pages(&pages).await? {
//!         println!("{}\n{}\n", section.original, section.chinese);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bookscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! bookscan = { version = "0.3", default-features = false }
//! ```
//!
//! ## Providers
//!
//! | Tag | Key variable | Vision model | Language model |
//! |-----|--------------|--------------|----------------|
//! | `qwen` (default) | `DASHSCOPE_API_KEY` | `qwen-vl-plus` | `qwen-max` |
//! | `gemini` | `GEMINI_API_KEY` | `gemini-2.0-flash` | `gemini-2.0-flash` |
//! | `openai` | `OPENAI_API_KEY` | `gpt-4o` | `gpt-4o` |
//! | `anthropic` | `ANTHROPIC_API_KEY` | `claude-sonnet-4-20250514` | same |
//! | `ollama` | none (`OLLAMA_BASE_URL`) | `llava` | `llama3` |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod providers;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    Environment, PageSelection, ProviderConfig, ProviderConfigBuilder, ScanOptions,
    TranslateOptions,
};
pub use error::{CallError, PipelineError, ProviderError, ProviderResult};
pub use pipeline::scan::{
    identify_book_structure, load_image_files, load_page_images, merge_scripture_texts,
    parse_ocr_response, BookStructure, ChapterSpan, Footnote, PageContent, PageImage,
    PageScanner, PageType,
};
pub use pipeline::translate::{
    ScriptureAnalysis, TranslatedFootnote, TranslatedSection, Translator,
};
pub use progress::{NoopProgress, PipelineProgress, ProgressCallback};
pub use providers::factory::{default_provider_name, ProviderFactory, ResolveOptions};
pub use providers::retry::RetryPolicy;
pub use providers::{
    list_providers, provider_info, AiProvider, ImageFormat, ProviderInfo, ProviderKind,
};
