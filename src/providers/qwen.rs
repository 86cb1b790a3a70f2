//! Alibaba Qwen via DashScope's OpenAI-compatible mode.

use super::openai::{chat_body, vision_body, ChatCompletions};
use super::{model_or, AiProvider, ImageFormat, ProviderKind};
use crate::config::ProviderConfig;
use crate::error::ProviderResult;
use async_trait::async_trait;

/// Qwen (`qwen-vl-plus` / `qwen-max`) provider.
pub struct QwenProvider {
    config: ProviderConfig,
    inner: ChatCompletions,
}

impl QwenProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let config = config.normalized();
        let inner = ChatCompletions::new(ProviderKind::Qwen, &config);
        Self { config, inner }
    }
}

#[async_trait]
impl AiProvider for QwenProvider {
    fn name(&self) -> &'static str {
        ProviderKind::Qwen.as_str()
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
            ProviderKind::Qwen.default_language_model(),
        );
        self.inner
            .complete(chat_body(model, prompt, system_prompt, &self.config))
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
            ProviderKind::Qwen.default_vision_model(),
        );
        self.inner
            .complete(vision_body(model, image, prompt, format, None, &self.config))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_supports_vision() {
        let p = QwenProvider::new(ProviderConfig::builder().vision_model("anything").build());
        assert!(p.supports_vision());
        assert_eq!(p.name(), "qwen");
    }

    #[test]
    fn normalises_config_on_construction() {
        let config = ProviderConfig {
            temperature: 9.0,
            ..ProviderConfig::default()
        };
        let p = QwenProvider::new(config);
        assert_eq!(p.config().temperature, 0.7);
    }
}
