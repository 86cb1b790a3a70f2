//! Google Gemini over the Generative Language REST API.

use super::retry::RetryPolicy;
use super::transport::{self, LazyClient, DEFAULT_CLOUD_TIMEOUT};
use super::{media, model_or, AiProvider, ImageFormat, ProviderKind};
use crate::config::{ProviderConfig, VISION_TEMPERATURE};
use crate::error::{CallError, ProviderResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

/// Inline image formats Gemini accepts; anything else is sent as PNG.
const SUPPORTED_FORMATS: &[ImageFormat] = &[ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Webp];

/// Gemini has no separate system role here: the system prompt is prepended
/// to the user text with a blank line in between.
pub(crate) fn chat_body(prompt: &str, system_prompt: Option<&str>, config: &ProviderConfig) -> Value {
    let text = match system_prompt.filter(|s| !s.is_empty()) {
        Some(system) => format!("{system}\n\n{prompt}"),
        None => prompt.to_string(),
    };

    json!({
        "contents": [{"role": "user", "parts": [{"text": text}]}],
        "generationConfig": {
            "temperature": config.temperature,
            "topP": config.top_p,
            "maxOutputTokens": config.max_tokens,
        },
    })
}

pub(crate) fn vision_body(
    image: &[u8],
    prompt: &str,
    format: ImageFormat,
    config: &ProviderConfig,
) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {"inline_data": {
                    "mime_type": format.mime_type_within(SUPPORTED_FORMATS),
                    "data": media::encode_base64(image),
                }},
                {"text": prompt},
            ],
        }],
        "generationConfig": {
            "temperature": VISION_TEMPERATURE,
            "maxOutputTokens": config.max_tokens,
        },
    })
}

/// Concatenate the text parts of the first candidate.
pub(crate) fn parse_response(body: &Value) -> Result<String, CallError> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(CallError::MalformedResponse(format!(
            "prompt blocked: {reason}"
        )));
    }

    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let finish = body
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .unwrap_or("none");
            CallError::MalformedResponse(format!(
                "no content parts in response (finishReason: {finish})"
            ))
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    transport::non_empty(text)
}

/// Gemini (`gemini-2.0-flash`) provider.
pub struct GeminiProvider {
    config: ProviderConfig,
    base_url: String,
    client: LazyClient,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let config = config.normalized();
        let base_url = config
            .api_base()
            .unwrap_or(ProviderKind::Gemini.default_base_url())
            .to_string();
        Self {
            client: LazyClient::new("gemini", config.timeout(DEFAULT_CLOUD_TIMEOUT)),
            retry: RetryPolicy::from_config(&config),
            base_url,
            config,
        }
    }

    async fn generate(&self, model: &str, body: Value) -> ProviderResult<String> {
        let client = self.client.get().await?;
        let url = transport::endpoint(
            &self.base_url,
            &format!("/v1beta/models/{model}:generateContent"),
        );
        debug!("gemini: POST {} ({} bytes)", url, body.to_string().len());

        let url = url.as_str();
        let api_key = self.config.api_key().unwrap_or_default();
        let body = &body;
        self.retry
            .run(self.name(), move || async move {
                let request = client
                    .post(url)
                    .header("x-goog-api-key", api_key)
                    .json(body);
                let response = transport::send_json(request).await?;
                parse_response(&response)
            })
            .await
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        ProviderKind::Gemini.as_str()
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
            ProviderKind::Gemini.default_language_model(),
        );
        self.generate(model, chat_body(prompt, system_prompt, &self.config))
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
            ProviderKind::Gemini.default_vision_model(),
        );
        self.generate(model, vision_body(image, prompt, format, &self.config))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_prepended() {
        let body = chat_body("Translate this", Some("You are a translator"), &ProviderConfig::default());
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "You are a translator\n\nTranslate this"
        );
        assert_eq!(body["generationConfig"]["topP"], 0.9);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn vision_sends_inline_data_first() {
        let body = vision_body(b"abc", "read", ImageFormat::Webp, &ProviderConfig::default());
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["inline_data"]["mime_type"], "image/webp");
        assert_eq!(parts[0]["inline_data"]["data"], "YWJj");
        assert_eq!(parts[1]["text"], "read");
        assert_eq!(body["generationConfig"]["temperature"], 0.1);
    }

    #[test]
    fn gif_is_sent_as_png() {
        let body = vision_body(b"abc", "read", ImageFormat::Gif, &ProviderConfig::default());
        assert_eq!(
            body["contents"][0]["parts"][0]["inline_data"]["mime_type"],
            "image/png"
        );
    }

    #[test]
    fn parses_candidate_parts() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "Hel"}, {"text": "lo"}]}}]});
        assert_eq!(parse_response(&body).unwrap(), "Hello");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = parse_response(&body).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn missing_parts_reports_finish_reason() {
        let body = json!({"candidates": [{"finishReason": "MAX_TOKENS"}]});
        let err = parse_response(&body).unwrap_err();
        assert!(err.to_string().contains("MAX_TOKENS"), "got {err}");
    }
}
