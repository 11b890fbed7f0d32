use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::risk::RiskParameters;

/// Top-level configuration for the decision core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuorumConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub ensemble: EnsembleConfig,
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub risk: RiskParameters,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            providers: vec![
                ProviderConfig {
                    id: "claude".to_string(),
                    weight: 1.0,
                    enabled: true,
                    kind: ProviderKind::ClaudeCli(ClaudeCliSettings::default()),
                },
                ProviderConfig {
                    id: "openai".to_string(),
                    weight: 1.0,
                    enabled: true,
                    kind: ProviderKind::OpenAi(HttpProviderSettings::new("gpt-4o-mini", "OPENAI_API_KEY")),
                },
                ProviderConfig {
                    id: "deepseek".to_string(),
                    weight: 0.8,
                    enabled: true,
                    kind: ProviderKind::DeepSeek(HttpProviderSettings::new(
                        "deepseek-chat",
                        "DEEPSEEK_API_KEY",
                    )),
                },
            ],
            ensemble: EnsembleConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            risk: RiskParameters::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl QuorumConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fail = |msg: String| Err(ValidationError::Config(msg));

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return fail("provider id must not be empty".to_string());
            }
            if !seen.insert(provider.id.as_str()) {
                return fail(format!("duplicate provider id: {}", provider.id));
            }
            if !(provider.weight.is_finite() && provider.weight > 0.0) {
                return fail(format!(
                    "provider {} weight must be positive, got {}",
                    provider.id, provider.weight
                ));
            }
            if provider.kind.model().trim().is_empty() {
                return fail(format!("provider {} has an empty model", provider.id));
            }
        }

        if self.ensemble.aggregation_timeout_ms == 0 {
            return fail("ensemble.aggregation_timeout_ms must be positive".to_string());
        }
        if !(self.ensemble.reliability_alpha > 0.0 && self.ensemble.reliability_alpha <= 1.0) {
            return fail(format!(
                "ensemble.reliability_alpha {} out of (0, 1]",
                self.ensemble.reliability_alpha
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return fail("breaker thresholds must be at least 1".to_string());
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".to_string());
        }
        if self.retry.multiplier < 1.0 {
            return fail(format!("retry.multiplier {} must be >= 1", self.retry.multiplier));
        }
        if !(0.0 <= self.retry.min_jitter && self.retry.min_jitter <= self.retry.max_jitter) {
            return fail(format!(
                "retry jitter range [{}, {}] is invalid",
                self.retry.min_jitter, self.retry.max_jitter
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return fail("retry.initial_delay_ms exceeds retry.max_delay_ms".to_string());
        }

        self.risk.validate()
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }
}

/// Response cache, cost optimizer and snapshot store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Path to the shared SQLite snapshot store written by external pipelines.
    pub sqlite_path: String,
    /// Set to false to bypass the provider response cache entirely.
    pub enabled: bool,
    pub max_capacity: u64,
    /// How long a provider response stays reusable for identical requests.
    pub response_ttl_seconds: u64,
    /// Prompt budget; longer prompts are compacted and truncated.
    pub max_prompt_chars: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/quorum_snapshot.db".to_string(),
            enabled: true,
            max_capacity: 10_000,
            response_ttl_seconds: 60,
            max_prompt_chars: 6_000,
        }
    }
}

/// One configured signal provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: ProviderKind,
}

fn default_weight() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

/// The closed set of supported providers, each with its own settings record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum ProviderKind {
    #[serde(rename = "claude_cli")]
    ClaudeCli(ClaudeCliSettings),
    #[serde(rename = "openai")]
    OpenAi(HttpProviderSettings),
    #[serde(rename = "anthropic")]
    Anthropic(HttpProviderSettings),
    #[serde(rename = "deepseek")]
    DeepSeek(HttpProviderSettings),
}

impl ProviderKind {
    pub fn model(&self) -> &str {
        match self {
            ProviderKind::ClaudeCli(s) => &s.model,
            ProviderKind::OpenAi(s) | ProviderKind::Anthropic(s) | ProviderKind::DeepSeek(s) => {
                &s.model
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::ClaudeCli(_) => "claude_cli",
            ProviderKind::OpenAi(_) => "openai",
            ProviderKind::Anthropic(_) => "anthropic",
            ProviderKind::DeepSeek(_) => "deepseek",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaudeCliSettings {
    pub model: String,
    #[serde(default = "default_cli_timeout")]
    pub timeout_seconds: u64,
}

fn default_cli_timeout() -> u64 {
    45
}

impl Default for ClaudeCliSettings {
    fn default() -> Self {
        Self {
            model: "claude-3-5-haiku-latest".to_string(),
            timeout_seconds: default_cli_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpProviderSettings {
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Overrides the provider's public endpoint (proxies, tests).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_http_timeout() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_temperature() -> f64 {
    0.2
}

impl HttpProviderSettings {
    pub fn new(model: &str, api_key_env: &str) -> Self {
        Self {
            model: model.to_string(),
            api_key_env: api_key_env.to_string(),
            base_url: None,
            timeout_seconds: default_http_timeout(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Quorum: fewer responders than this triggers single-provider fallback.
    pub min_providers: usize,
    /// Shared deadline for one aggregation round.
    pub aggregation_timeout_ms: u64,
    /// Latencies up to this value carry full vote weight.
    pub latency_reference_ms: u64,
    /// Smoothing factor of the reliability moving average.
    pub reliability_alpha: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_providers: 2,
            aggregation_timeout_ms: 10_000,
            latency_reference_ms: 5_000,
            reliability_alpha: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_seconds: 60,
            success_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Jitter is drawn uniformly from `[min_jitter, max_jitter]` of the capped delay.
    pub min_jitter: f64,
    pub max_jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            min_jitter: 0.1,
            max_jitter: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Minimum spacing between executed non-HOLD decisions for one symbol.
    pub decision_cooldown_ms: u64,
    /// Symbols driven by the scheduler loop.
    pub symbols: Vec<String>,
    pub interval_seconds: u64,
    /// Buffer size of the decision notification channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            decision_cooldown_ms: 60_000,
            symbols: Vec::new(),
            interval_seconds: 60,
            event_capacity: 64,
        }
    }
}
