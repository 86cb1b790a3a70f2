//! Build a provider from a name plus layered configuration.
//!
//! Every field is resolved independently, first hit wins:
//!
//! 1. the explicit value in [`ResolveOptions`]
//! 2. the process environment
//! 3. the `.env` file found by [`Environment::load`]
//! 4. the built-in default
//!
//! | Field            | Variable                                      |
//! |------------------|-----------------------------------------------|
//! | provider         | `AI_PROVIDER` (default `qwen`)                |
//! | api key          | `DASHSCOPE_API_KEY`, `GEMINI_API_KEY`, …      |
//! | vision model     | `{PROVIDER}_VISION_MODEL`                     |
//! | language model   | `{PROVIDER}_LANGUAGE_MODEL`                   |
//! | base URL         | `OLLAMA_BASE_URL` (ollama only)               |
//! | sampling, retry  | `MAX_TOKENS`, `TEMPERATURE`, `TOP_P`, `MAX_RETRIES`, `RETRY_DELAY` |

use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::qwen::QwenProvider;
use super::{AiProvider, ProviderKind};
use crate::config::{Environment, ProviderConfig};
use crate::error::ProviderResult;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Variable naming the provider when none is given explicitly.
pub const PROVIDER_ENV: &str = "AI_PROVIDER";
/// Provider used when nothing selects one.
pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Qwen;
/// Base URL variable for the local Ollama server.
pub const OLLAMA_BASE_URL_ENV: &str = "OLLAMA_BASE_URL";

/// Explicit overrides; `None` fields fall through to the environment.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub vision_model: Option<String>,
    pub language_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<f64>,
    /// Merged over the resolved config's `extra` map.
    pub extra: HashMap<String, Value>,
}

impl ResolveOptions {
    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Name-tagged constructor for the five provider variants.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Resolve options against `env` and construct the provider.
    pub fn resolve(
        options: &ResolveOptions,
        env: &Environment,
    ) -> ProviderResult<Arc<dyn AiProvider>> {
        let (kind, config) = Self::resolve_config(options, env)?;
        info!(
            "Using provider '{}' (vision: {}, language: {})",
            kind, config.vision_model, config.language_model
        );
        Ok(Self::create(kind, config))
    }

    /// Resolve everything except the construction itself.
    pub fn resolve_config(
        options: &ResolveOptions,
        env: &Environment,
    ) -> ProviderResult<(ProviderKind, ProviderConfig)> {
        let kind: ProviderKind = match options.provider.as_deref() {
            Some(name) => name.parse()?,
            None => default_provider_name(env).parse()?,
        };
        let prefix = kind.env_prefix();

        let api_key = options.api_key.clone().or_else(|| {
            kind.api_key_env()
                .and_then(|var| env.get(var))
                .map(str::to_string)
        });

        let api_base = options.api_base.clone().or_else(|| match kind {
            ProviderKind::Ollama => Some(
                env.get(OLLAMA_BASE_URL_ENV)
                    .unwrap_or(kind.default_base_url())
                    .to_string(),
            ),
            _ => None,
        });

        let vision_model = options
            .vision_model
            .clone()
            .or_else(|| env.get(&format!("{prefix}_VISION_MODEL")).map(str::to_string))
            .unwrap_or_else(|| kind.default_vision_model().to_string());
        let language_model = options
            .language_model
            .clone()
            .or_else(|| env.get(&format!("{prefix}_LANGUAGE_MODEL")).map(str::to_string))
            .unwrap_or_else(|| kind.default_language_model().to_string());

        let defaults = ProviderConfig::default();
        let mut config = ProviderConfig {
            api_key,
            api_base,
            vision_model,
            language_model,
            max_tokens: pick(options.max_tokens, env.parse("MAX_TOKENS")?, defaults.max_tokens),
            temperature: pick(options.temperature, env.parse("TEMPERATURE")?, defaults.temperature),
            top_p: pick(options.top_p, env.parse("TOP_P")?, defaults.top_p),
            max_retries: pick(options.max_retries, env.parse("MAX_RETRIES")?, defaults.max_retries),
            retry_delay: pick(options.retry_delay, env.parse("RETRY_DELAY")?, defaults.retry_delay),
            extra: defaults.extra,
        };
        config
            .extra
            .extend(options.extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        Ok((kind, config.normalized()))
    }

    /// Construct a provider of `kind` from an already resolved config.
    pub fn create(kind: ProviderKind, config: ProviderConfig) -> Arc<dyn AiProvider> {
        match kind {
            ProviderKind::Qwen => Arc::new(QwenProvider::new(config)),
            ProviderKind::Gemini => Arc::new(GeminiProvider::new(config)),
            ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)),
            ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(config)),
            ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)),
        }
    }

    /// Provider selected by `AI_PROVIDER` in the process environment or `.env`.
    pub fn from_env() -> ProviderResult<Arc<dyn AiProvider>> {
        let env = Environment::load(None)?;
        Self::resolve(&ResolveOptions::default(), &env)
    }
}

/// `AI_PROVIDER` from the environment layers, or `qwen`.
pub fn default_provider_name(env: &Environment) -> String {
    env.get(PROVIDER_ENV)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| DEFAULT_PROVIDER.as_str().to_string())
}

fn pick<T>(explicit: Option<T>, from_env: Option<T>, default: T) -> T {
    explicit.or(from_env).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    fn env(process: &[(&str, &str)], file: &[(&str, &str)]) -> Environment {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>()
        };
        Environment::from_maps(to_map(process), to_map(file))
    }

    #[test]
    fn gemini_from_environment() {
        let env = env(&[("AI_PROVIDER", "gemini"), ("GEMINI_API_KEY", "abc")], &[]);
        let provider = ProviderFactory::resolve(&ResolveOptions::default(), &env).unwrap();
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.config().api_key(), Some("abc"));
        assert_eq!(provider.config().vision_model, "gemini-2.0-flash");
        assert_eq!(provider.config().language_model, "gemini-2.0-flash");
    }

    #[test]
    fn defaults_to_qwen() {
        let (kind, config) =
            ProviderFactory::resolve_config(&ResolveOptions::default(), &env(&[], &[])).unwrap();
        assert_eq!(kind, ProviderKind::Qwen);
        assert_eq!(config.vision_model, "qwen-vl-plus");
        assert_eq!(config.language_model, "qwen-max");
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.max_retries, 3);
        assert!(config.api_key().is_none());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let options = ResolveOptions::default().provider("unknownvendor");
        let err = ProviderFactory::resolve(&options, &env(&[], &[])).err().unwrap();
        match &err {
            ProviderError::UnknownProvider { name, available } => {
                assert_eq!(name, "unknownvendor");
                assert_eq!(available, "qwen, gemini, openai, anthropic, ollama");
            }
            other => panic!("expected UnknownProvider, got {other:?}"),
        }
    }

    #[test]
    fn explicit_beats_process_beats_file() {
        let env = env(
            &[("OPENAI_API_KEY", "process-key"), ("OPENAI_VISION_MODEL", "gpt-4.1")],
            &[
                ("OPENAI_API_KEY", "file-key"),
                ("OPENAI_VISION_MODEL", "file-model"),
                ("OPENAI_LANGUAGE_MODEL", "gpt-4o-mini"),
            ],
        );
        let options = ResolveOptions {
            vision_model: Some("explicit-model".into()),
            ..ResolveOptions::default().provider("openai")
        };
        let (_, config) = ProviderFactory::resolve_config(&options, &env).unwrap();
        assert_eq!(config.vision_model, "explicit-model");
        assert_eq!(config.api_key(), Some("process-key"));
        assert_eq!(config.language_model, "gpt-4o-mini");
    }

    #[test]
    fn unparsable_number_names_the_variable() {
        let env = env(&[("MAX_TOKENS", "lots")], &[]);
        let err = ProviderFactory::resolve(&ResolveOptions::default(), &env).err().unwrap();
        assert!(matches!(err, ProviderError::InvalidConfig(_)));
        assert!(err.to_string().contains("MAX_TOKENS"), "got {err}");
    }

    #[test]
    fn shared_settings_are_read_and_normalised() {
        let env = env(
            &[("TEMPERATURE", "0.2"), ("TOP_P", "7"), ("MAX_RETRIES", "5")],
            &[("RETRY_DELAY", "0.5")],
        );
        let (_, config) = ProviderFactory::resolve_config(&ResolveOptions::default(), &env).unwrap();
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.top_p, 0.9);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, 0.5);
    }

    #[test]
    fn huge_retry_delay_still_builds_a_provider() {
        let env = env(&[("RETRY_DELAY", "1e30")], &[]);
        let provider = ProviderFactory::resolve(&ResolveOptions::default(), &env).unwrap();
        assert_eq!(provider.config().retry_delay, 1e30);
    }

    #[test]
    fn every_variant_normalises_a_raw_config() {
        for kind in ProviderKind::ALL {
            let raw = ProviderConfig {
                temperature: 9.0,
                top_p: 4.0,
                max_tokens: 0,
                ..ProviderConfig::default()
            };
            let provider = ProviderFactory::create(kind, raw);
            let config = provider.config();
            assert_eq!(config.temperature, 0.7, "{kind}");
            assert_eq!(config.top_p, 0.9, "{kind}");
            assert_eq!(config.max_tokens, 4096, "{kind}");
        }
    }

    #[test]
    fn ollama_takes_base_url_and_no_key() {
        let env = env(
            &[("AI_PROVIDER", "ollama"), ("OLLAMA_BASE_URL", "http://gpu-box:11434")],
            &[("DASHSCOPE_API_KEY", "unused")],
        );
        let provider = ProviderFactory::resolve(&ResolveOptions::default(), &env).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.config().api_base(), Some("http://gpu-box:11434"));
        assert!(provider.config().api_key().is_none());

        let (_, config) = ProviderFactory::resolve_config(
            &ResolveOptions::default().provider("ollama"),
            &Environment::from_maps(HashMap::new(), HashMap::new()),
        )
        .unwrap();
        assert_eq!(config.api_base(), Some("http://localhost:11434"));
    }

    #[test]
    fn extra_entries_are_merged() {
        let mut options = ResolveOptions::default().provider("openai");
        options
            .extra
            .insert("image_detail".into(), Value::String("low".into()));
        let (_, config) = ProviderFactory::resolve_config(&options, &env(&[], &[])).unwrap();
        assert_eq!(config.extra_str("image_detail"), Some("low"));
    }

    #[test]
    fn provider_name_from_file_layer() {
        let env = env(&[], &[("AI_PROVIDER", "Anthropic")]);
        assert_eq!(default_provider_name(&env), "anthropic");
        assert_eq!(default_provider_name(&Environment::from_maps(HashMap::new(), HashMap::new())), "qwen");
    }
}
