//! CLI binary for bookscan.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ResolveOptions` / `ScanOptions` / `TranslateOptions` and prints results.

use anyhow::{bail, Context, Result};
use bookscan::{
    identify_book_structure, list_providers, load_image_files, load_page_images,
    merge_scripture_texts, provider_info, AiProvider, BookStructure, Environment, PageContent,
    PageScanner, PageSelection, PipelineProgress, ProgressCallback, ProviderFactory,
    ResolveOptions, ScanOptions, TranslateOptions, Translator,
};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per item.
struct CliProgress {
    bar: ProgressBar,
    /// "pages" or "paragraphs".
    unit: &'static str,
    verb: &'static str,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgress {
    fn new(verb: &'static str, unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            verb,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, item: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&item))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl PipelineProgress for CliProgress {
    fn on_start(&self, total: usize) {
        let style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>3}}/{{len}} {}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}",
            self.unit
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix(self.verb);
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{} {total} {}…", self.verb, self.unit))
        ));
    }

    fn on_item_start(&self, item: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(item, Instant::now());
        }
        self.bar.set_message(format!("#{item}"));
    }

    fn on_item_complete(&self, item: usize, total: usize, chars: usize) {
        let secs = self.elapsed_secs(item);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            item,
            total,
            dim(&format!("{chars:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, item: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(item);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            item,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_complete(&self, total: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        if self.errors.load(Ordering::SeqCst) == 0 && succeeded == total {
            eprintln!("{} {} {} done", green("✔"), bold(&succeeded.to_string()), self.unit);
        } else {
            eprintln!(
                "{} {}/{} {} done, stopped on error",
                red("✘"),
                bold(&succeeded.to_string()),
                total,
                self.unit
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Which providers exist and what they default to
  bookscan providers

  # Quick connectivity test
  bookscan --provider gemini chat "Say hello in Chinese"

  # OCR a directory of page images (sorted by file name)
  bookscan ocr scans/ --json -o pages.json

  # OCR pages 3 to 10 with a local model
  bookscan --provider ollama ocr scans/ --pages 3-10

  # Translate scanned pages into Chinese sections
  bookscan translate pages.json -o sections.json

ENVIRONMENT VARIABLES:
  AI_PROVIDER             qwen (default), gemini, openai, anthropic, ollama
  DASHSCOPE_API_KEY       Qwen (Alibaba DashScope) API key
  GEMINI_API_KEY          Google Gemini API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  OLLAMA_BASE_URL         Ollama server (default http://localhost:11434)
  {PROVIDER}_VISION_MODEL, {PROVIDER}_LANGUAGE_MODEL
                          Model overrides, e.g. OPENAI_VISION_MODEL=gpt-4.1
  MAX_TOKENS, TEMPERATURE, TOP_P, MAX_RETRIES, RETRY_DELAY
                          Shared sampling and retry settings

  Values are also read from a .env file (current or parent directory);
  the process environment wins over the file, and flags win over both.
"#;

/// OCR scanned book pages and translate them with AI providers.
#[derive(Parser, Debug)]
#[command(
    name = "bookscan",
    version,
    about = "OCR scanned book pages and translate them to Chinese with AI providers",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Provider: qwen, gemini, openai, anthropic, ollama.
    #[arg(long, global = true)]
    provider: Option<String>,

    /// API key (overrides the provider's key variable).
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Vision model ID.
    #[arg(long, global = true)]
    vision_model: Option<String>,

    /// Language model ID.
    #[arg(long, global = true)]
    language_model: Option<String>,

    /// Explicit .env file (default: ./.env, then ../.env).
    #[arg(long, global = true, env = "BOOKSCAN_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Total attempts per provider call.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Disable progress bar.
    #[arg(long, global = true, env = "BOOKSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BOOKSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BOOKSCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List providers with their default models.
    Providers {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send one prompt to the language model.
    Chat {
        prompt: String,

        /// Optional system prompt.
        #[arg(long)]
        system: Option<String>,
    },

    /// OCR page images (a directory, or image files in page order).
    Ocr {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Page selection: all, 5, 3-15, or 1,3,5,7.
        #[arg(long, default_value = "all")]
        pages: String,

        /// Print pages and structure as JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Write the JSON result to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pause between pages in milliseconds.
        #[arg(long, env = "BOOKSCAN_PAGE_DELAY_MS", default_value_t = 500)]
        delay_ms: u64,

        /// Text file with a custom OCR prompt.
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },

    /// Translate pages produced by `ocr --json` into Chinese sections.
    Translate {
        input: PathBuf,

        /// Write sections JSON to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pause between calls in milliseconds.
        #[arg(long, env = "BOOKSCAN_CALL_DELAY_MS", default_value_t = 300)]
        delay_ms: u64,
    },
}

/// What `ocr --json` writes and `translate` reads.
#[derive(Debug, Serialize, Deserialize)]
struct ScanReport {
    pages: Vec<PageContent>,
    structure: BookStructure,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let env = Environment::load(cli.env_file.as_deref()).context("Failed to load .env file")?;

    match &cli.command {
        Command::Providers { json } => print_providers(&env, *json),
        Command::Chat { prompt, system } => {
            let provider = resolve_provider(&cli, &env)?;
            let reply = provider
                .chat(prompt, system.as_deref())
                .await
                .context("Chat request failed")?;
            println!("{reply}");
            Ok(())
        }
        Command::Ocr {
            inputs,
            pages,
            json,
            output,
            delay_ms,
            prompt_file,
        } => {
            let provider = resolve_provider(&cli, &env)?;
            let prompt = match prompt_file {
                Some(path) => Some(
                    tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read prompt from {:?}", path))?,
                ),
                None => None,
            };
            let options = ScanOptions {
                pages: pages
                    .parse::<PageSelection>()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid --pages")?,
                page_delay: Duration::from_millis(*delay_ms),
                prompt,
                progress: progress_for(show_progress, "Scanning", "pages"),
            };
            run_ocr(&cli, provider, options, inputs, *json, output.as_deref()).await
        }
        Command::Translate {
            input,
            output,
            delay_ms,
        } => {
            let provider = resolve_provider(&cli, &env)?;
            let options = TranslateOptions {
                call_delay: Duration::from_millis(*delay_ms),
                progress: progress_for(show_progress, "Translating", "paragraphs"),
                ..TranslateOptions::default()
            };
            run_translate(&cli, provider, options, input, output.as_deref()).await
        }
    }
}

fn progress_for(show: bool, verb: &'static str, unit: &'static str) -> Option<ProgressCallback> {
    show.then(|| CliProgress::new(verb, unit) as ProgressCallback)
}

/// Map global flags to `ResolveOptions` and build the provider.
fn resolve_provider(cli: &Cli, env: &Environment) -> Result<Arc<dyn AiProvider>> {
    let options = ResolveOptions {
        provider: cli.provider.clone(),
        api_key: cli.api_key.clone(),
        vision_model: cli.vision_model.clone(),
        language_model: cli.language_model.clone(),
        max_retries: cli.max_retries,
        ..ResolveOptions::default()
    };
    let provider = ProviderFactory::resolve(&options, env).context("Invalid provider configuration")?;

    if !cli.quiet {
        eprintln!(
            "{} {} {}",
            cyan("◆"),
            bold(provider.name()),
            dim(&format!(
                "vision: {}  language: {}",
                provider.config().vision_model,
                provider.config().language_model
            ))
        );
    }
    Ok(provider)
}

fn print_providers(env: &Environment, json: bool) -> Result<()> {
    let infos = list_providers()
        .into_iter()
        .map(provider_info)
        .collect::<Result<Vec<_>, _>>()?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&infos).context("Failed to serialise providers")?
        );
        return Ok(());
    }

    let default = bookscan::default_provider_name(env);
    println!(
        "{:<11} {:<26} {:<26} {}",
        bold("Provider"),
        bold("Vision model"),
        bold("Language model"),
        bold("Key")
    );
    for info in infos {
        let key = match info.api_key_env {
            None => dim("not needed"),
            Some(var) if env.get(var).is_some() => green(&format!("{var} ✓")),
            Some(var) => red(&format!("{var} ✗")),
        };
        let marker = if info.name == default { "*" } else { " " };
        println!(
            "{marker}{:<10} {:<26} {:<26} {}",
            info.name, info.default_vision_model, info.default_language_model, key
        );
    }
    println!("{}", dim("* selected by AI_PROVIDER (default qwen)"));
    Ok(())
}

async fn run_ocr(
    cli: &Cli,
    provider: Arc<dyn AiProvider>,
    options: ScanOptions,
    inputs: &[PathBuf],
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let started = Instant::now();
    let images = match inputs {
        [dir] if dir.is_dir() => load_page_images(dir)
            .await
            .with_context(|| format!("Failed to load page images from {:?}", dir))?,
        files => load_image_files(files)
            .await
            .context("Failed to load page images")?,
    };

    let scanner = PageScanner::new(provider, options);
    let pages = scanner.scan_pages(&images).await.context("Scan failed")?;
    let structure = identify_book_structure(&pages);
    let pages = merge_scripture_texts(pages);
    let report = ScanReport { pages, structure };

    if json || output.is_some() {
        let text = serde_json::to_string_pretty(&report).context("Failed to serialise pages")?;
        write_output(output, &text).await?;
    } else {
        for page in &report.pages {
            println!("{}", bold(&format!("── Page {} ({}) ──", page.page_number, page.page_type)));
            if let Some(s) = &page.scripture_text {
                println!("{}", cyan(s));
            }
            println!("{}", page.main_content);
            for f in &page.footnotes {
                println!("{}", dim(&format!("{} {}", f.marker, f.content)));
            }
            println!();
        }
    }

    if !cli.quiet {
        print_structure(&report.structure);
        eprintln!(
            "{}  {} pages  {:.1}s",
            green("✔"),
            report.pages.len(),
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

fn print_structure(s: &BookStructure) {
    let list = |pages: &[usize]| {
        if pages.is_empty() {
            dim("-")
        } else {
            pages.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
        }
    };
    eprintln!("Title pages:    {}", list(&s.title_pages));
    eprintln!("Preface pages:  {}", list(&s.preface_pages));
    eprintln!("TOC pages:      {}", list(&s.toc_pages));
    eprintln!("Index pages:    {}", list(&s.index_pages));
    for c in &s.content_sections {
        eprintln!("  {:<20} pages {}-{}", c.chapter, c.start_page, c.end_page);
    }
}

async fn run_translate(
    cli: &Cli,
    provider: Arc<dyn AiProvider>,
    options: TranslateOptions,
    input: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let started = Instant::now();
    let raw = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {:?}", input))?;
    let pages = parse_pages_file(&raw).with_context(|| format!("Invalid pages file {:?}", input))?;
    if pages.is_empty() {
        bail!("{:?} contains no pages", input);
    }

    let translator = Translator::new(provider, options);
    let sections = translator
        .create_sections_from_pages(&pages)
        .await
        .context("Translation failed")?;

    let text = serde_json::to_string_pretty(&sections).context("Failed to serialise sections")?;
    write_output(output, &text).await?;

    if !cli.quiet {
        eprintln!(
            "{}  {} sections from {} pages  {:.1}s",
            green("✔"),
            sections.len(),
            pages.len(),
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}

/// Accept either a `ScanReport` object or a bare array of pages.
fn parse_pages_file(raw: &str) -> Result<Vec<PageContent>> {
    let value: Value = serde_json::from_str(raw)?;
    let pages = match value {
        Value::Array(_) => serde_json::from_value(value)?,
        Value::Object(_) => serde_json::from_value::<ScanReport>(value)?.pages,
        _ => bail!("expected a JSON array of pages or an object with a `pages` field"),
    };
    Ok(pages)
}

async fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => tokio::fs::write(path, format!("{text}\n"))
            .await
            .with_context(|| format!("Failed to write {:?}", path)),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}
