//! LLM provider implementations

pub mod anthropic;
pub mod gemini;
pub(crate) mod http;
pub mod openai;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, LLMProvider, Message, ProviderError, ProviderResult, Role,
};

use crate::config::{Config, ProviderConfig, ProviderKind};
use std::sync::Arc;

/// Build a provider from a profile, reading its API key from the environment
pub fn from_profile(profile: &ProviderConfig) -> ProviderResult<Arc<dyn LLMProvider>> {
    let provider: Arc<dyn LLMProvider> = match profile.kind {
        ProviderKind::OpenaiCompatible => {
            let mut client = OpenAIClient::from_env(&profile.api_key_env)?
                .with_name(&profile.name)
                .with_rate_limits(profile.rpm, profile.tpm)
                .with_model(&profile.default_model);
            if let Some(url) = &profile.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderKind::Anthropic => {
            let mut client = AnthropicClient::from_env(&profile.api_key_env)?
                .with_rate_limits(profile.rpm, profile.tpm)
                .with_model(&profile.default_model);
            if let Some(url) = &profile.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderKind::Gemini => {
            let mut client = GeminiClient::from_env(&profile.api_key_env)?
                .with_rate_limits(profile.rpm, profile.tpm)
                .with_model(&profile.default_model)
                .with_sampling(profile.top_p, profile.top_k);
            if let Some(url) = &profile.base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    };

    Ok(provider)
}

/// Create a provider by profile name
pub fn create_provider(name: &str, config: &Config) -> ProviderResult<Arc<dyn LLMProvider>> {
    let profile = config
        .get_provider(&name.to_lowercase())
        .ok_or_else(|| ProviderError::Config(format!("Unknown provider: {}", name)))?;

    if !profile.enabled {
        return Err(ProviderError::Config(format!("Provider {} is disabled", name)));
    }

    from_profile(profile)
}
