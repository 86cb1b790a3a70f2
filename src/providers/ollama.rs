//! Local models served by Ollama.
//!
//! No API key is involved. The first `chat`/`vision` call checks that the
//! server answers `GET /api/tags` within five seconds; if it does not, the
//! call fails with [`ProviderError::Connection`] and is not retried.
//!
//! Generation uses `POST /api/generate` with `stream: true`. The reply is
//! newline-delimited JSON; the `response` (or `message.content`) fragments
//! are concatenated and lines that do not parse are skipped.

use super::retry::RetryPolicy;
use super::transport::{self, build_client};
use super::{matches_family, media, model_or, AiProvider, ImageFormat, ProviderKind};
use crate::config::{ProviderConfig, VISION_TEMPERATURE};
use crate::error::{CallError, ProviderError, ProviderResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::pin::pin;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const VISION_FAMILIES: &[&str] = &["llava", "bakllava", "moondream"];

/// Generation can be slow on CPU-only hosts.
pub const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const LIST_TIMEOUT: Duration = Duration::from_secs(10);
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) fn chat_body(
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    config: &ProviderConfig,
) -> Value {
    let mut body = json!({
        "model": model,
        "prompt": prompt,
        "stream": true,
        "options": {
            "temperature": config.temperature,
            "top_p": config.top_p,
            "num_predict": config.max_tokens,
        },
    });
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }
    body
}

pub(crate) fn vision_body(model: &str, image: &[u8], prompt: &str, config: &ProviderConfig) -> Value {
    json!({
        "model": model,
        "prompt": prompt,
        "images": [media::encode_base64(image)],
        "stream": true,
        "options": {
            "temperature": VISION_TEMPERATURE,
            "num_predict": config.max_tokens,
        },
    })
}

/// Incremental NDJSON reader for `/api/generate` streams.
#[derive(Debug, Default)]
pub(crate) struct NdjsonText {
    pending: Vec<u8>,
    text: String,
}

impl NdjsonText {
    /// Feed a chunk of bytes; complete lines are consumed immediately.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Result<(), CallError> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.consume_line(&line)?;
        }
        Ok(())
    }

    /// Flush any trailing line without a newline and return the text.
    pub(crate) fn finish(mut self) -> Result<String, CallError> {
        let rest = std::mem::take(&mut self.pending);
        self.consume_line(&rest)?;
        transport::non_empty(self.text)
    }

    fn consume_line(&mut self, line: &[u8]) -> Result<(), CallError> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let chunk: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                debug!("ollama: skipping malformed stream line");
                return Ok(());
            }
        };
        if let Some(err) = chunk.get("error").and_then(Value::as_str) {
            return Err(CallError::MalformedResponse(format!("ollama error: {err}")));
        }
        if let Some(fragment) = chunk.get("response").and_then(Value::as_str) {
            self.text.push_str(fragment);
        } else if let Some(fragment) = chunk.pointer("/message/content").and_then(Value::as_str) {
            self.text.push_str(fragment);
        }
        Ok(())
    }
}

/// Ollama provider (`llava` / `llama3` by default).
pub struct OllamaProvider {
    config: ProviderConfig,
    base_url: String,
    timeout: Duration,
    client: OnceCell<Client>,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let config = config.normalized();
        let base_url = config
            .api_base()
            .unwrap_or(ProviderKind::Ollama.default_base_url())
            .trim_end_matches('/')
            .to_string();
        Self {
            timeout: config.timeout(DEFAULT_GENERATE_TIMEOUT),
            retry: RetryPolicy::from_config(&config),
            client: OnceCell::new(),
            base_url,
            config,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The client, after a successful connectivity check on first use.
    async fn client(&self) -> ProviderResult<&Client> {
        self.client
            .get_or_try_init(|| async {
                let client = build_client(self.name(), self.timeout)?;
                self.check_connection(&client).await?;
                Ok::<_, ProviderError>(client)
            })
            .await
    }

    async fn check_connection(&self, client: &Client) -> ProviderResult<()> {
        let url = transport::endpoint(&self.base_url, "/api/tags");
        debug!("ollama: checking {}", url);
        let outcome = client.get(&url).timeout(CONNECT_CHECK_TIMEOUT).send().await;
        let detail = match outcome {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => format!("Ollama is not responding (HTTP {})", resp.status()),
            Err(e) => e.to_string(),
        };
        Err(ProviderError::Connection {
            provider: self.name().to_string(),
            endpoint: self.base_url.clone(),
            detail,
        })
    }

    async fn generate(&self, body: Value) -> ProviderResult<String> {
        let client = self.client().await?;
        let url = transport::endpoint(&self.base_url, "/api/generate");
        debug!("ollama: POST {} ({} bytes)", url, body.to_string().len());

        let url = url.as_str();
        let body = &body;
        self.retry
            .run(self.name(), move || async move {
                let response = transport::send(client.post(url).json(body)).await?;
                let mut stream = pin!(response.bytes_stream());
                let mut reader = NdjsonText::default();
                while let Some(chunk) = stream.next().await {
                    reader.push(&chunk?)?;
                }
                reader.finish()
            })
            .await
    }

    /// Names of the models installed on the server.
    pub async fn list_models(&self) -> ProviderResult<Vec<String>> {
        let client = self.client().await?;
        let url = transport::endpoint(&self.base_url, "/api/tags");
        let url = url.as_str();

        let tags = RetryPolicy::once()
            .run(self.name(), move || async move {
                transport::send_json(client.get(url).timeout(LIST_TIMEOUT)).await
            })
            .await?;

        Ok(tags
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Download `model` into the server's library, logging each status line.
    pub async fn pull_model(&self, model: &str) -> ProviderResult<()> {
        let client = self.client().await?;
        let url = transport::endpoint(&self.base_url, "/api/pull");
        let url = url.as_str();
        info!("Pulling model: {}", model);

        RetryPolicy::once()
            .run(self.name(), move || async move {
                let request = client
                    .post(url)
                    .timeout(PULL_TIMEOUT)
                    .json(&json!({"name": model, "stream": true}));
                let mut stream = pin!(transport::send(request).await?.bytes_stream());
                let mut pending = Vec::new();
                while let Some(chunk) = stream.next().await {
                    pending.extend_from_slice(&chunk?);
                    while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = pending.drain(..=pos).collect();
                        log_pull_status(&line)?;
                    }
                }
                log_pull_status(&pending)
            })
            .await?;

        info!("Model {} pulled successfully", model);
        Ok(())
    }
}

fn log_pull_status(line: &[u8]) -> Result<(), CallError> {
    let Ok(chunk) = serde_json::from_slice::<Value>(line) else {
        return Ok(());
    };
    if let Some(err) = chunk.get("error").and_then(Value::as_str) {
        return Err(CallError::MalformedResponse(format!("ollama error: {err}")));
    }
    if let Some(status) = chunk.get("status").and_then(Value::as_str) {
        info!("  {}", status);
    }
    Ok(())
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        ProviderKind::Ollama.as_str()
    }

    fn supports_vision(&self) -> bool {
        let model = model_or(
            &self.config.vision_model,
            ProviderKind::Ollama.default_vision_model(),
        );
        matches_family(model, VISION_FAMILIES)
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> ProviderResult<String> {
        let model = model_or(
            &self.config.language_model,
            ProviderKind::Ollama.default_language_model(),
        );
        self.generate(chat_body(model, prompt, system_prompt, &self.config))
            .await
    }

    async fn vision(
        &self,
        image: &[u8],
        prompt: &str,
        _format: ImageFormat,
    ) -> ProviderResult<String> {
        let model = model_or(
            &self.config.vision_model,
            ProviderKind::Ollama.default_vision_model(),
        );
        self.generate(vision_body(model, image, prompt, &self.config))
            .await
    }

    /// Reachability of the server; no key is needed.
    async fn validate(&self) -> bool {
        match self.client().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Ollama validation failed: {}", e);
                false
            }
        }
    }
}
