//! Shared HTTP plumbing for the provider variants.
//!
//! Each provider owns a [`LazyClient`]: the `reqwest::Client` is built on the
//! first call and reused afterwards. Non-success responses are turned into
//! [`CallError::Status`] with the body redacted and truncated, so API keys
//! echoed back by a vendor never reach logs or error messages.

use crate::error::{CallError, ProviderError, ProviderResult};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Transport timeout for cloud vendors unless `extra.timeout_secs` overrides it.
pub(crate) const DEFAULT_CLOUD_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_ERROR_TEXT_CHARS: usize = 1_024;
const MASK: &str = "***";

/// Key shapes issued by the vendors: `sk-…` (OpenAI, DashScope, Anthropic)
/// and `AIza…` (Google).
static VENDOR_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:sk-[A-Za-z0-9_\-]{4,}|AIza[A-Za-z0-9_\-]{8,})").unwrap());

/// Credentials echoed in headers or URLs: `Bearer <token>`, `x-api-key: …`,
/// `x-goog-api-key: …` and Gemini's `?key=…` query parameter.
static CREDENTIAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(\bbearer\s+|\b(?:x-goog-api-key|x-api-key|api_key|key)\s*[:=]\s*"?)[^"'\s,&}]+"#)
        .unwrap()
});

/// JSON fields dropped wholesale from error payloads.
const CREDENTIAL_FIELDS: &[&str] = &["api_key", "key", "authorization", "x-api-key", "x-goog-api-key"];

/// Build the HTTP client for `provider`.
///
/// The only failure mode is a TLS backend that cannot initialise; it is
/// reported as a missing dependency rather than a call failure.
pub(crate) fn build_client(provider: &str, timeout: Duration) -> ProviderResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::DependencyMissing {
            provider: provider.to_string(),
            hint: format!(
                "The HTTP client could not be initialised ({e}). \
                 Rebuild bookscan with the default `rustls-tls` reqwest feature."
            ),
        })
}

/// A `reqwest::Client` created on first use.
pub(crate) struct LazyClient {
    provider: &'static str,
    timeout: Duration,
    cell: OnceCell<Client>,
}

impl LazyClient {
    pub(crate) fn new(provider: &'static str, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            cell: OnceCell::new(),
        }
    }

    pub(crate) async fn get(&self) -> ProviderResult<&Client> {
        self.cell
            .get_or_try_init(|| async {
                debug!(
                    "{}: initialising HTTP client (timeout {}s)",
                    self.provider,
                    self.timeout.as_secs()
                );
                build_client(self.provider, self.timeout)
            })
            .await
    }
}

/// Join a base URL and an absolute path without doubling the slash.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// Send the request and return the response if the status is a success.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, CallError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CallError::Status {
        status: status.as_u16(),
        body: sanitize_error_text(&body),
    })
}

/// Send the request and decode a JSON response body.
pub(crate) async fn send_json(request: RequestBuilder) -> Result<Value, CallError> {
    let response = send(request).await?;
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| {
        CallError::MalformedResponse(format!(
            "invalid JSON ({e}): {}",
            sanitize_error_text(&text)
        ))
    })
}

/// Turn extracted vendor text into a result, rejecting blank replies.
pub(crate) fn non_empty(text: String) -> Result<String, CallError> {
    if text.trim().is_empty() {
        Err(CallError::EmptyResponse)
    } else {
        Ok(text)
    }
}

/// Mask credentials and cap the length of an error body before it is stored.
pub(crate) fn sanitize_error_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "<empty error response body>".to_string();
    }

    let masked = match serde_json::from_str::<Value>(trimmed) {
        Ok(mut json) => {
            mask_json(&mut json);
            json.to_string()
        }
        Err(_) => mask_text(trimmed),
    };
    clip(masked)
}

fn mask_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (field, val) in map.iter_mut() {
                if CREDENTIAL_FIELDS.contains(&field.to_ascii_lowercase().as_str()) {
                    *val = Value::String(MASK.to_string());
                } else {
                    mask_json(val);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_json),
        Value::String(s) => *s = mask_text(s),
        _ => {}
    }
}

fn mask_text(text: &str) -> String {
    let keys = VENDOR_KEY_RE.replace_all(text, MASK);
    CREDENTIAL_RE
        .replace_all(&keys, format!("${{1}}{MASK}").as_str())
        .into_owned()
}

fn clip(text: String) -> String {
    match text.char_indices().nth(MAX_ERROR_TEXT_CHARS) {
        Some((cut, _)) => {
            let dropped = text[cut..].chars().count();
            format!("{}… (+{dropped} chars)", &text[..cut])
        }
        None => text,
    }
}
