pub mod circuit_breaker;
pub mod claude_cli;
pub mod ensemble;
pub mod error;
pub mod http;
pub mod parser;
pub mod prompts;
pub mod provider;
pub mod reliability;
pub mod retry;

pub mod test_support;

pub use circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
pub use claude_cli::ClaudeCliProvider;
pub use ensemble::{build_consensus, vote_weight, EnsembleAggregator, ProviderHealth, WeightedSignal};
pub use error::ProviderError;
pub use http::{AnthropicProvider, DeepSeekProvider, OpenAiProvider};
pub use provider::{build_provider, ProviderRequest, SignalProvider};
pub use reliability::ReliabilityTracker;
pub use retry::{RetryAttempt, RetryPolicy};
