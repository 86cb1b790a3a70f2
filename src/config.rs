//! Configuration types for providers and the digitisation pipeline.
//!
//! * [`ProviderConfig`] — credentials, model names, sampling and retry
//!   parameters for one provider. Construction normalises instead of failing.
//! * [`Environment`] — an explicit snapshot of the process environment plus
//!   values parsed from a `.env` file. The provider factory reads every
//!   setting through it, so no component consults ambient global state.
//! * [`ScanOptions`] / [`TranslateOptions`] — caller-side pacing, page
//!   selection and progress reporting for the scanner and translator.

use crate::error::ProviderError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;

/// Sampling temperature forced on every vision call.
///
/// Vision is used for OCR, where the model must transcribe rather than
/// invent; the configured `temperature` only applies to `chat`.
pub const VISION_TEMPERATURE: f64 = 0.1;

/// Configuration for a single AI provider.
///
/// Out-of-range values are reset to their defaults by [`normalized`]
/// (called by the builder and by every provider constructor), so building a
/// config never fails.
///
/// [`normalized`]: ProviderConfig::normalized
///
/// # Example
/// ```rust
/// use bookscan::ProviderConfig;
///
/// let config = ProviderConfig::builder()
///     .api_key("sk-test")
///     .vision_model("gpt-4o")
///     .temperature(7.5) // out of range
///     .build();
/// assert_eq!(config.temperature, 0.7);
/// ```
#[derive(Clone, PartialEq)]
pub struct ProviderConfig {
    /// API key. Optional for local providers (Ollama).
    pub api_key: Option<String>,

    /// Override for the vendor base URL.
    pub api_base: Option<String>,

    /// Model used by `vision`. Empty means the provider default.
    pub vision_model: String,

    /// Model used by `chat`. Empty means the provider default.
    pub language_model: String,

    /// Maximum generated tokens per call. Default: 4096.
    pub max_tokens: u32,

    /// Chat sampling temperature in `[0, 2]`. Default: 0.7.
    pub temperature: f64,

    /// Nucleus sampling in `[0, 1]`. Default: 0.9.
    pub top_p: f64,

    /// Total attempts per call before giving up. Default: 3.
    pub max_retries: u32,

    /// Base backoff delay in seconds, doubled after each failure. Default: 1.0.
    pub retry_delay: f64,

    /// Vendor-specific options (`timeout_secs`, `image_detail`,
    /// `anthropic_version`).
    pub extra: HashMap<String, Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: None,
            vision_model: String::new(),
            language_model: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            extra: HashMap::new(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("vision_model", &self.vision_model)
            .field("language_model", &self.language_model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("extra", &self.extra)
            .finish()
    }
}

impl ProviderConfig {
    /// Create a new builder for `ProviderConfig`.
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Reset out-of-range fields to their defaults.
    pub fn normalized(mut self) -> Self {
        if self.max_tokens == 0 {
            self.max_tokens = DEFAULT_MAX_TOKENS;
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = DEFAULT_TEMPERATURE;
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            self.top_p = DEFAULT_TOP_P;
        }
        if !self.retry_delay.is_finite() || self.retry_delay <= 0.0 {
            self.retry_delay = DEFAULT_RETRY_DELAY_SECS;
        }
        self
    }

    /// The API key, treating an empty string as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// The base URL override, treating an empty string as absent.
    pub fn api_base(&self) -> Option<&str> {
        self.api_base.as_deref().filter(|b| !b.is_empty())
    }

    /// String-valued entry of `extra`.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Per-call transport timeout: `extra["timeout_secs"]` or `default`.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.extra
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// `retry_delay` as a [`Duration`], saturating at [`Duration::MAX`].
    pub fn retry_delay_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay).unwrap_or(Duration::MAX)
    }
}

/// Builder for [`ProviderConfig`].
#[derive(Debug)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.config.api_base = Some(base.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = model.into();
        self
    }

    pub fn language_model(mut self, model: impl Into<String>) -> Self {
        self.config.language_model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.config.temperature = t;
        self
    }

    pub fn top_p(mut self, p: f64) -> Self {
        self.config.top_p = p;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_delay(mut self, secs: f64) -> Self {
        self.config.retry_delay = secs;
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.extra.insert(key.into(), value.into());
        self
    }

    /// Build the configuration. Never fails: out-of-range values are reset.
    pub fn build(self) -> ProviderConfig {
        self.config.normalized()
    }
}

// ── Environment ──────────────────────────────────────────────────────────

/// Process environment plus `.env` file values, consulted in that order.
///
/// Empty values count as unset so that `FOO=` in a `.env` file does not
/// shadow the built-in default.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    process: HashMap<String, String>,
    file: HashMap<String, String>,
    file_path: Option<PathBuf>,
}

impl Environment {
    /// Snapshot the process environment and the first `.env` file found.
    ///
    /// Search order: `env_file` (if given), `./.env`, `../.env`. The file is
    /// parsed without modifying the process environment.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ProviderError> {
        let mut env = Self::from_process();

        let candidates = env_file
            .map(Path::to_path_buf)
            .into_iter()
            .chain([PathBuf::from(".env"), PathBuf::from("../.env")]);

        for path in candidates {
            if path.is_file() {
                env.file = read_env_file(&path)?;
                debug!("Loaded {} settings from {}", env.file.len(), path.display());
                env.file_path = Some(path);
                break;
            }
        }

        Ok(env)
    }

    /// Snapshot of the process environment only.
    pub fn from_process() -> Self {
        Self {
            process: std::env::vars().collect(),
            ..Self::default()
        }
    }

    /// Build an environment from explicit maps.
    pub fn from_maps(process: HashMap<String, String>, file: HashMap<String, String>) -> Self {
        Self {
            process,
            file,
            file_path: None,
        }
    }

    /// The `.env` file that was loaded, if any.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// First non-empty value: process environment, then `.env` file.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.process
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.file.get(key).filter(|v| !v.trim().is_empty()))
            .map(|v| v.trim())
    }

    /// Parse a variable, failing with [`ProviderError::InvalidConfig`] on a
    /// value that does not parse.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ProviderError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| {
                ProviderError::InvalidConfig(format!("{key}={raw:?} is not valid: {e}"))
            }),
        }
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ProviderError> {
    let iter = dotenv::from_path_iter(path).map_err(|e| {
        ProviderError::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
    })?;

    iter.map(|item| {
        item.map_err(|e| {
            ProviderError::InvalidConfig(format!("Failed to parse {}: {e}", path.display()))
        })
    })
    .collect()
}

// ── Pipeline options ─────────────────────────────────────────────────────

/// Specifies which page images to scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Scan all pages (default).
    #[default]
    All,
    /// Scan a single page (1-indexed).
    Single(usize),
    /// Scan a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Scan specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed positions.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl FromStr for PageSelection {
    type Err = String;

    /// Parse `all`, `5`, `3-15` or `1,3,5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let page = |p: &str| -> Result<usize, String> {
            let n: usize = p
                .trim()
                .parse()
                .map_err(|_| format!("Invalid page number: '{}'", p.trim()))?;
            if n < 1 {
                return Err(format!("Pages are 1-indexed, minimum is 1 (got {n})"));
            }
            Ok(n)
        };

        if s == "all" {
            return Ok(PageSelection::All);
        }
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(format!(
                    "Invalid page range '{start}-{end}': start must be <= end"
                ));
            }
            return Ok(PageSelection::Range(start, end));
        }
        if s.contains(',') {
            return s
                .split(',')
                .map(page)
                .collect::<Result<Vec<_>, _>>()
                .map(PageSelection::Set);
        }
        page(s.as_str()).map(PageSelection::Single)
    }
}

/// Options for [`crate::PageScanner`].
#[derive(Clone)]
pub struct ScanOptions {
    /// Pages to scan. Default: all.
    pub pages: PageSelection,

    /// Pause between consecutive vision calls. Default: 500 ms.
    ///
    /// Caller-side pacing to stay under vendor rate limits; unrelated to the
    /// retry backoff inside providers.
    pub page_delay: Duration,

    /// Custom OCR prompt. If None, uses the built-in prompt.
    pub prompt: Option<String>,

    /// Progress events for each page.
    pub progress: Option<ProgressCallback>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            pages: PageSelection::All,
            page_delay: Duration::from_millis(500),
            prompt: None,
            progress: None,
        }
    }
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("pages", &self.pages)
            .field("page_delay", &self.page_delay)
            .field("prompt", &self.prompt.as_ref().map(|p| p.len()))
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressCallback>"))
            .finish()
    }
}

/// Options for [`crate::Translator`].
#[derive(Clone)]
pub struct TranslateOptions {
    /// Pause between consecutive chat calls. Default: 300 ms.
    pub call_delay: Duration,

    /// Pause between batch requests in `translate_batch`. Default: 500 ms.
    pub batch_delay: Duration,

    /// Paragraphs per request in `translate_batch`. Default: 5.
    pub batch_size: usize,

    /// Previous paragraphs passed as context. Default: 2.
    pub context_window: usize,

    /// Progress events for each paragraph.
    pub progress: Option<ProgressCallback>,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self {
            call_delay: Duration::from_millis(300),
            batch_delay: Duration::from_millis(500),
            batch_size: 5,
            context_window: 2,
            progress: None,
        }
    }
}

impl fmt::Debug for TranslateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslateOptions")
            .field("call_delay", &self.call_delay)
            .field("batch_delay", &self.batch_delay)
            .field("batch_size", &self.batch_size)
            .field("context_window", &self.context_window)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressCallback>"))
            .finish()
    }
}
