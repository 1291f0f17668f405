use crate::anthropic::AnthropicAdapter;
use crate::error::{LlmError, Result};
use crate::model::LanguageModel;
use crate::openai::OpenAiAdapter;
use crate::provider::HttpModel;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl Provider {
    pub fn detect(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.starts_with("claude-") {
            return Provider::Anthropic;
        }
        Provider::OpenAI
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub model: String,
    /// Overrides the provider's default API root (e.g. an OpenAI-compatible gateway).
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Build the HTTP-backed model for `config.model`.
#[tracing::instrument(level = "debug", skip_all, fields(model = %config.model))]
pub fn connect(config: &ClientConfig) -> Result<Arc<dyn LanguageModel>> {
    if config.model.trim().is_empty() {
        return Err(LlmError::InvalidInput("model is required".to_string()));
    }
    let http = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(%e, "reqwest client build failed; falling back to default client");
            reqwest::Client::new()
        });

    let provider = Provider::detect(&config.model);
    tracing::debug!(provider = provider.as_str(), "language model selected");
    let base_url = config.base_url.as_deref();
    let model: Arc<dyn LanguageModel> = match provider {
        Provider::OpenAI => Arc::new(HttpModel::new(
            http,
            OpenAiAdapter::new(base_url),
            &config.api_key,
            &config.model,
        )),
        Provider::Anthropic => Arc::new(HttpModel::new(
            http,
            AnthropicAdapter::new(base_url),
            &config.api_key,
            &config.model,
        )),
    };
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_is_detected_from_model_name() {
        assert_eq!(Provider::detect("claude-sonnet-4-5"), Provider::Anthropic);
        assert_eq!(Provider::detect("Claude-3-haiku"), Provider::Anthropic);
        assert_eq!(Provider::detect("gpt-4o-mini"), Provider::OpenAI);
        assert_eq!(Provider::detect("llama3"), Provider::OpenAI);
    }

    #[test]
    fn connect_builds_model_for_detected_provider() {
        let model = connect(&ClientConfig::new("sk-test", "claude-sonnet-4-5")).expect("model");
        assert_eq!(model.provider(), "anthropic");
        assert_eq!(model.model_id(), "claude-sonnet-4-5");

        let err = connect(&ClientConfig::new("sk-test", "  ")).err().expect("empty model");
        assert!(err.to_string().contains("model is required"));
    }
}
