//! Pluggable AI providers behind one `chat`/`vision` contract.
//!
//! Every consumer (the OCR scanner, the translator, the CLI) talks to an
//! `Arc<dyn AiProvider>` and never branches on which vendor sits behind it.
//! Per-vendor differences (auth header shape, image encoding, default models,
//! where the system prompt goes) stay inside the variant modules.
//!
//! ## Variants
//!
//! | Tag         | Module        | Transport                               |
//! |-------------|---------------|-----------------------------------------|
//! | `qwen`      | [`qwen`]      | DashScope, OpenAI-compatible mode       |
//! | `gemini`    | [`gemini`]    | Google Generative Language REST         |
//! | `openai`    | [`openai`]    | OpenAI chat completions                 |
//! | `anthropic` | [`anthropic`] | Anthropic messages                      |
//! | `ollama`    | [`ollama`]    | Local Ollama server, NDJSON streaming   |
//!
//! ## Call path
//!
//! ```text
//! chat / vision
//!  │
//!  ├─ 1. Client   lazily build the reqwest client (first call only)
//!  ├─ 2. Body     vendor-specific JSON request
//!  └─ 3. Retry    RetryPolicy: attempt, back off 1×, 2×, 4× …, give up
//! ```

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod media;
pub mod ollama;
pub mod openai;
pub mod qwen;
pub mod retry;
mod transport;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

pub use self::media::ImageFormat;

/// Uniform capability exposed by every provider variant.
///
/// Implementations own exactly one transport client, built on the first
/// `chat` or `vision` call. They are `Send + Sync` so an instance can be
/// shared through an `Arc`; the pipeline still issues calls one at a time.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Constant tag identifying the variant (`"qwen"`, `"openai"`, …).
    fn name(&self) -> &'static str;

    /// Whether the configured vision model can read images.
    fn supports_vision(&self) -> bool;

    /// The normalised configuration the provider was built with.
    fn config(&self) -> &ProviderConfig;

    /// Single-turn text generation with the language model.
    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> ProviderResult<String>;

    /// Single-turn image + text generation with the vision model.
    ///
    /// Always sampled at [`crate::config::VISION_TEMPERATURE`].
    async fn vision(&self, image: &[u8], prompt: &str, format: ImageFormat)
        -> ProviderResult<String>;

    /// Check that the provider is usable; logs the reason when it is not.
    async fn validate(&self) -> bool {
        if self.config().api_key().is_none() {
            warn!("No API key configured for {}", self.name());
            return false;
        }
        true
    }
}

/// The five supported provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Qwen,
    Gemini,
    OpenAi,
    Anthropic,
    Ollama,
}

impl ProviderKind {
    /// All variants, in registry order.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Qwen,
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Ollama,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Qwen => "qwen",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
        }
    }

    /// Environment variable holding the API key. Ollama needs none.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::Qwen => Some("DASHSCOPE_API_KEY"),
            ProviderKind::Gemini => Some("GEMINI_API_KEY"),
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Ollama => None,
        }
    }

    pub fn requires_api_key(self) -> bool {
        self.api_key_env().is_some()
    }

    /// Prefix of the `{PROVIDER}_VISION_MODEL` / `{PROVIDER}_LANGUAGE_MODEL` variables.
    pub fn env_prefix(self) -> String {
        self.as_str().to_uppercase()
    }

    pub fn default_vision_model(self) -> &'static str {
        match self {
            ProviderKind::Qwen => "qwen-vl-plus",
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Ollama => "llava",
        }
    }

    pub fn default_language_model(self) -> &'static str {
        match self {
            ProviderKind::Qwen => "qwen-max",
            ProviderKind::Gemini => "gemini-2.0-flash",
            ProviderKind::OpenAi => "gpt-4o",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Ollama => "llama3",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Qwen => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Ollama => "http://localhost:11434",
        }
    }

    /// Comma-separated list of every tag, for error messages.
    pub fn available() -> String {
        Self::ALL
            .iter()
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn info(self) -> ProviderInfo {
        ProviderInfo {
            name: self.as_str(),
            default_vision_model: self.default_vision_model(),
            default_language_model: self.default_language_model(),
            requires_api_key: self.requires_api_key(),
            api_key_env: self.api_key_env(),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == tag)
            .ok_or_else(|| ProviderError::UnknownProvider {
                name: tag,
                available: Self::available(),
            })
    }
}

/// Static description of a provider variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub default_vision_model: &'static str,
    pub default_language_model: &'static str,
    pub requires_api_key: bool,
    pub api_key_env: Option<&'static str>,
}

/// Names of all provider variants.
pub fn list_providers() -> Vec<&'static str> {
    ProviderKind::ALL.iter().map(|k| k.as_str()).collect()
}

/// Describe a provider by name.
pub fn provider_info(name: &str) -> ProviderResult<ProviderInfo> {
    name.parse::<ProviderKind>().map(ProviderKind::info)
}

/// Resolve the model to use: the configured one, or the variant default.
pub(crate) fn model_or<'a>(configured: &'a str, default: &'a str) -> &'a str {
    if configured.trim().is_empty() {
        default
    } else {
        configured
    }
}

/// Case-insensitive substring match of `model` against known model families.
pub(crate) fn matches_family(model: &str, families: &[&str]) -> bool {
    let model = model.to_lowercase();
    families.iter().any(|f| model.contains(f))
}
