//! Error types for the bookscan library.
//!
//! Three error types mirror three layers of failure:
//!
//! * [`CallError`] — a **single attempt** against a vendor endpoint failed
//!   (network blip, HTTP 429/5xx, unparseable body). Never returned to
//!   callers on its own: the retry policy consumes it, and only the last one
//!   survives inside [`ProviderError::CallFailed`].
//!
//! * [`ProviderError`] — the provider layer gave up. Configuration problems
//!   (unknown provider, unparsable environment value), a missing transport,
//!   an unreachable local Ollama server, or exhausted retries.
//!
//! * [`PipelineError`] — the scanner/translator could not finish (a provider
//!   error, an unreadable page image, malformed JSON input).
//!
//! No layer swallows the one below it: a failed `chat`/`vision` call always
//! surfaces as an error, never as an empty string.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single vendor request attempt.
#[derive(Debug, Error)]
pub enum CallError {
    /// The HTTP transport failed (DNS, TLS, connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The vendor answered with a non-success status.
    ///
    /// `body` is redacted and truncated before it is stored.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response parsed as JSON but lacked the expected fields.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The vendor returned no text at all.
    #[error("empty response")]
    EmptyResponse,
}

impl CallError {
    /// True for HTTP 429 responses.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CallError::Status { status: 429, .. })
    }

    /// True when the transport gave up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Transport(e) if e.is_timeout())
    }
}

/// Errors surfaced by providers and the provider factory.
#[derive(Debug, Error)]
pub enum ProviderError {
    // ── Configuration errors ──────────────────────────────────────────────
    /// The requested provider name is not one of the known variants.
    #[error("Unknown provider: {name}. Available providers: {available}")]
    UnknownProvider { name: String, available: String },

    /// A configuration value could not be interpreted.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Initialisation errors ─────────────────────────────────────────────
    /// The vendor transport could not be constructed.
    #[error("Transport for provider '{provider}' is unavailable.\n{hint}")]
    DependencyMissing { provider: String, hint: String },

    /// The local provider endpoint did not answer the connectivity check.
    #[error(
        "Cannot connect to {provider} at {endpoint}.\n\
Make sure the server is running: ollama serve\n\
Error: {detail}"
    )]
    Connection {
        provider: String,
        endpoint: String,
        detail: String,
    },

    // ── Call errors ───────────────────────────────────────────────────────
    /// Every attempt failed; `source` is the last attempt's error.
    #[error("All {attempts} retries failed for {provider}: {source}")]
    CallFailed {
        provider: String,
        attempts: u32,
        #[source]
        source: CallError,
    },
}

impl ProviderError {
    /// True for errors caused by configuration rather than the vendor.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ProviderError::UnknownProvider { .. } | ProviderError::InvalidConfig(_)
        )
    }
}

/// Errors returned by the OCR scanner and the translator.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A page image or input file could not be read.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialised pages could not be parsed.
    #[error("Invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),

    /// The selection or directory yielded no page images.
    #[error("No page images to process")]
    NoPages,
}

pub type ProviderResult<T> = Result<T, ProviderError>;
