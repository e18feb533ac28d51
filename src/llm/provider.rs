use async_trait::async_trait;
use tracing::debug;

use crate::config::LLMConfig;
use crate::llm::openai::OpenAIAdapter;
use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Connection settings for one text-generation provider
pub struct LLMProviderConfig {
    pub provider: LLMProvider,
    pub api_key: String,
    /// Overrides the provider's default endpoint (proxies, local servers)
    pub base_url: Option<String>,
}

pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
    model: String,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig, model: impl Into<String>) -> Self {
        let base_url = provider
            .base_url
            .unwrap_or_else(|| provider.provider.base_url().to_string());

        // OpenAI, OpenRouter and Groq all speak the chat-completions wire format.
        let adapter: Box<dyn LLMAdapter> = Box::new(OpenAIAdapter::with_base_url(&provider.api_key, &base_url));

        Self {
            adapter,
            provider_name: provider.provider.to_string(),
            model: model.into(),
        }
    }

    /// Build from environment configuration
    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        let provider: LLMProvider = config.provider.parse()?;
        let api_key = config.api_key_for(provider).ok_or_else(|| {
            AppError::InvalidRequest(format!("No API key configured for provider {}", provider))
        })?;

        debug!(provider = %provider, model = %config.model, "Configured LLM provider");

        Ok(Self::new(
            LLMProviderConfig {
                provider,
                api_key,
                base_url: config.base_url.clone(),
            },
            config.model.clone(),
        ))
    }

    /// Wrap an arbitrary adapter (custom providers, tests)
    pub fn from_adapter(
        name: impl Into<String>,
        model: impl Into<String>,
        adapter: Box<dyn LLMAdapter>,
    ) -> Self {
        Self {
            adapter,
            provider_name: name.into(),
            model: model.into(),
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    /// Model requests are sent to unless a request names another
    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}
