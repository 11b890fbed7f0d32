pub mod config;
pub mod ensemble;
pub mod error;
pub mod market;
pub mod portfolio;
pub mod risk;
pub mod signal;
pub mod snapshot_schema;
pub mod trading_decision;

pub use config::{
    CacheConfig, CircuitBreakerConfig, ClaudeCliSettings, EnsembleConfig, HttpProviderSettings,
    OrchestratorConfig, ProviderConfig, ProviderKind, QuorumConfig, RetryConfig,
};
pub use ensemble::{ActionTally, EnsembleDecision, ExcludedProvider};
pub use error::ValidationError;
pub use market::{
    Liquidity, MarketCondition, MarketData, MarketRegime, MarketVolatility, Sentiment,
    TradingSession, Trend, VolatilityRegime,
};
pub use portfolio::{PortfolioPoint, PortfolioSnapshot, Position};
pub use risk::{
    DrawdownAction, DrawdownState, RiskAdjustment, RiskAssessment, RiskLevel, RiskParameters,
    RiskParametersUpdate, RiskVeto, VetoKind,
};
pub use signal::{Action, ProviderSignal};
pub use snapshot_schema::{SnapshotCategory, SnapshotRow};
pub use trading_decision::{TradingDecision, OUTPUT_SCHEMA_VERSION};
