//! Anthropic Claude over the Messages API.

use super::retry::RetryPolicy;
use super::transport::{self, LazyClient, DEFAULT_CLOUD_TIMEOUT};
use super::{media, model_or, AiProvider, ImageFormat, ProviderKind};
use crate::config::{ProviderConfig, VISION_TEMPERATURE};
use crate::error::{CallError, ProviderResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub const DEFAULT_API_VERSION: &str = "2023-06-01";

pub(crate) fn chat_body(
    model: &str,
    prompt: &str,
    system_prompt: Option<&str>,
    config: &ProviderConfig,
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": config.max_tokens,
        "messages": [{"role": "user", "content": prompt}],
        "temperature": config.temperature,
    });
    if let Some(system) = system_prompt.filter(|s| !s.is_empty()) {
        body["system"] = json!(system);
    }
    body
}

pub(crate) fn vision_body(
    model: &str,
    image: &[u8],
    prompt: &str,
    format: ImageFormat,
    config: &ProviderConfig,
) -> Value {
    json!({
        "model": model,
        "max_tokens": config.max_tokens,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "image", "source": {
                    "type": "base64",
                    "media_type": format.mime_type(),
                    "data": media::encode_base64(image),
                }},
                {"type": "text", "text": prompt},
            ],
        }],
        "temperature": VISION_TEMPERATURE,
    })
}

/// Text of the first `text` content block.
pub(crate) fn parse_response(body: &Value) -> Result<String, CallError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| CallError::MalformedResponse("missing content array".into()))?;

    let text = blocks
        .iter()
        .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    transport::non_empty(text)
}

/// Claude provider.
pub struct AnthropicProvider {
    config: ProviderConfig,
    url: String,
    client: LazyClient,
    retry: RetryPolicy,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let config = config.normalized();
        let base = config
            .api_base()
            .unwrap_or(ProviderKind::Anthropic.default_base_url());
        Self {
            url: transport::endpoint(base, "/v1/messages"),
            client: LazyClient::new("anthropic", config.timeout(DEFAULT_CLOUD_TIMEOUT)),
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    fn api_version(&self) -> &str {
        self.config
            .extra_str("anthropic_version")
            .unwrap_or(DEFAULT_API_VERSION)
    }

    async fn messages(&self, body: Value) -> ProviderResult<String> {
        let client = self.client.get().await?;
        debug!("anthropic: POST {} ({} bytes)", self.url, body.to_string().len());

        let url = self.url.as_str();
        let api_key = self.config.api_key().unwrap_or_default();
        let version = self.api_version();
        let body = &body;
        self.retry
            .run(self.name(), move || async move {
                let request = client
                    .post(url)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", version)
                    .json(body);
                let response = transport::send_json(request).await?;
                parse_response(&response)
            })
            .await
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        ProviderKind::Anthropic.as_str()
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat(&self, prompt: &str, system_prompt: Option<&str>) -> ProviderResult<String> {
        let model = model_or(
            &self.config.language_model,
            ProviderKind::Anthropic.default_language_model(),
        );
        self.messages(chat_body(model, prompt, system_prompt, &self.config))
            .await
    }

    async fn vision(
        &self,
        image: &[u8],
        prompt: &str,
        format: ImageFormat,
    ) -> ProviderResult<String> {
        let model = model_or(
            &self.config.vision_model,
            ProviderKind::Anthropic.default_vision_model(),
        );
        self.messages(vision_body(model, image, prompt, format, &self.config))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_goes_top_level() {
        let body = chat_body("claude", "hi", Some("sys"), &ProviderConfig::default());
        assert_eq!(body["system"], "sys");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["temperature"], 0.7);
        assert!(body.get("top_p").is_none());

        let body = chat_body("claude", "hi", None, &ProviderConfig::default());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn vision_uses_base64_source_block() {
        let body = vision_body("claude", b"abc", "read", ImageFormat::Jpeg, &ProviderConfig::default());
        let block = &body["messages"][0]["content"][0];
        assert_eq!(block["type"], "image");
        assert_eq!(block["source"]["type"], "base64");
        assert_eq!(block["source"]["media_type"], "image/jpeg");
        assert_eq!(block["source"]["data"], "YWJj");
        assert_eq!(body["temperature"], 0.1);
    }

    #[test]
    fn unknown_format_name_maps_to_png() {
        let body = vision_body(
            "claude",
            b"abc",
            "read",
            ImageFormat::from_name("bmp"),
            &ProviderConfig::default(),
        );
        assert_eq!(body["messages"][0]["content"][0]["source"]["media_type"], "image/png");
    }

    #[test]
    fn parses_first_text_block() {
        let body = json!({"content": [
            {"type": "thinking", "thinking": "..."},
            {"type": "text", "text": "answer"},
            {"type": "text", "text": "ignored"}
        ]});
        assert_eq!(parse_response(&body).unwrap(), "answer");
        assert!(matches!(
            parse_response(&json!({"content": []})),
            Err(CallError::EmptyResponse)
        ));
    }

    #[test]
    fn version_header_defaults() {
        let p = AnthropicProvider::new(ProviderConfig::default());
        assert_eq!(p.api_version(), "2023-06-01");
        let p = AnthropicProvider::new(
            ProviderConfig::builder()
                .extra("anthropic_version", "2024-01-01")
                .build(),
        );
        assert_eq!(p.api_version(), "2024-01-01");
    }
}
