//! OpenAI chat-completions provider.
//!
//! The request/response helpers in this module are shared with
//! [`super::qwen`], whose DashScope endpoint speaks the same wire format.

use super::retry::RetryPolicy;
use super::transport::{self, LazyClient, DEFAULT_CLOUD_TIMEOUT};
use super::{matches_family, media, model_or, AiProvider, ImageFormat, ProviderKind};
use crate::config::{ProviderConfig, VISION_TEMPERATURE};
use crate::error::{CallError, ProviderResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

const VISION_FAMILIES: &[&str] = &["gpt-4o", "gpt-4-turbo", "gpt-4-vision", "gpt-4.1"];

/// Default `detail` level on image parts; high detail is what OCR needs.
pub const DEFAULT_IMAGE_DETAIL: &str = "high";

/// Body of a text-only chat completion.
pub(crate) fn chat_body(
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    config: &ProviderConfig,
) -> Value {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
        "top_p": config.top_p,
    })
}

/// Body of a vision completion: one image part then one text part.
///
/// `detail` is omitted when `None` (DashScope does not use it).
pub(crate) fn vision_body(
    model: &str,
    image: &[u8],
    prompt: &str,
    format: ImageFormat,
    detail: Option<&str>,
    config: &ProviderConfig,
) -> Value {
    let mut image_url = json!({ "url": media::data_uri(image, format.mime_type()) });
    if let Some(detail) = detail {
        image_url["detail"] = json!(detail);
    }

    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "image_url", "image_url": image_url},
                {"type": "text", "text": prompt},
            ],
        }],
        "max_tokens": config.max_tokens,
        "temperature": VISION_TEMPERATURE,
    })
}

/// Extract `choices[0].message.content`, accepting a string or a list of parts.
pub(crate) fn parse_completion(body: &Value) -> Result<String, CallError> {
    let content = body
        .pointer("/choices/0/message/content")
        .ok_or_else(|| CallError::MalformedResponse("missing choices[0].message.content".into()))?;

    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Value::Null => String::new(),
        other => {
            return Err(CallError::MalformedResponse(format!(
                "unexpected content type: {other}"
            )))
        }
    };
    transport::non_empty(text)
}

/// Connection to one OpenAI-compatible chat-completions endpoint.
pub(crate) struct ChatCompletions {
    name: &'static str,
    url: String,
    api_key: Option<String>,
    client: LazyClient,
    retry: RetryPolicy,
}

impl ChatCompletions {
    pub(crate) fn new(kind: ProviderKind, config: &ProviderConfig) -> Self {
        let base = config.api_base().unwrap_or(kind.default_base_url());
        Self {
            name: kind.as_str(),
            url: transport::endpoint(base, "/chat/completions"),
            api_key: config.api_key().map(str::to_string),
            client: LazyClient::new(kind.as_str(), config.timeout(DEFAULT_CLOUD_TIMEOUT)),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub(crate) async fn complete(&self, body: Value) -> ProviderResult<String> {
        let client = self.client.get().await?;
        debug!("{}: POST {} ({} bytes)", self.name, self.url, body.to_string().len());

        let url = self.url.as_str();
        let api_key = self.api_key.as_deref();
        let body = &body;
        self.retry
            .run(self.name, move || async move {
                let mut request = client.post(url).json(body);
                if let Some(key) = api_key {
                    request = request.bearer_auth(key);
                }
                let response = transport::send_json(request).await?;
                parse_completion(&response)
            })
            .await
    }
}

/// OpenAI (`gpt-4o` family) provider.
pub struct OpenAiProvider {
    config: ProviderConfig,
    inner: ChatCompletions,
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let config = config.normalized();
        let inner = ChatCompletions::new(ProviderKind::OpenAi, &config);
        Self { config, inner }
    }

    fn image_detail(&self) -> &str {
        self.config
            .extra_str("image_detail")
            .unwrap_or(DEFAULT_IMAGE_DETAIL)
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        ProviderKind::OpenAi.as_str()
    }

    fn supports_vision(&self) -> bool {
        let model = model_or(
            &self.config.vision_model,
            ProviderKind::OpenAi.default_vision_model(),
        );
        matches_family(model, VISION_FAMILIES)
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> ProviderResult<String> {
        let model = model_or(
            &self.config.language_model,
            ProviderKind::OpenAi.default_language_model(),
        );
        let body = chat_body(model, prompt, system_prompt, &self.config);
        self.inner.complete(body).await
    }

    async fn vision(
        &self,
        image: &[u8],
        prompt: &str,
        format: ImageFormat,
    ) -> ProviderResult<String> {
        let model = model_or(
            &self.config.vision_model,
            ProviderKind::OpenAi.default_vision_model(),
        );
        let body = vision_body(
            model,
            image,
            prompt,
            format,
            Some(self.image_detail()),
            &self.config,
        );
        self.inner.complete(body).await
    }
}
