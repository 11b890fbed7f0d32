use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quorum_cache::normalize_request;
use quorum_models::{MarketData, ProviderConfig, ProviderKind, ProviderSignal};
use uuid::Uuid;

use crate::claude_cli::ClaudeCliProvider;
use crate::error::ProviderError;
use crate::http::{AnthropicProvider, DeepSeekProvider, OpenAiProvider};

/// One prompt for one symbol, sent identically to every provider in a round.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub request_id: Uuid,
    pub symbol: String,
    pub system_prompt: String,
    pub prompt: String,
    pub market: MarketData,
}

impl ProviderRequest {
    /// Whitespace-insensitive identity of the request, used for cache keys.
    pub fn fingerprint(&self) -> String {
        normalize_request(&format!("{}\n{}", self.system_prompt, self.prompt))
    }
}

/// A source of trading signals. Mockable for testing.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderSignal, ProviderError>;
}

/// Construct the adapter for a configured provider.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn SignalProvider>, ProviderError> {
    let provider: Arc<dyn SignalProvider> = match &config.kind {
        ProviderKind::ClaudeCli(settings) => Arc::new(ClaudeCliProvider::new(
            config.id.clone(),
            settings.model.clone(),
            Duration::from_secs(settings.timeout_seconds),
        )),
        ProviderKind::OpenAi(settings) => Arc::new(OpenAiProvider::new(config.id.clone(), settings)?),
        ProviderKind::Anthropic(settings) => {
            Arc::new(AnthropicProvider::new(config.id.clone(), settings)?)
        }
        ProviderKind::DeepSeek(settings) => {
            Arc::new(DeepSeekProvider::new(config.id.clone(), settings)?)
        }
    };
    Ok(provider)
}
