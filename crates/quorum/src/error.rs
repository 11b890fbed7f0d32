use quorum_cache::CacheError;
use quorum_risk::RiskError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("No market data for {0}")]
    MissingMarketData(String),

    #[error("Portfolio unavailable: {0}")]
    Portfolio(String),

    #[error("Snapshot store error: {0}")]
    Snapshot(#[from] CacheError),

    #[error("Risk engine error: {0}")]
    Risk(#[from] RiskError),

    #[error("Decision sink failed: {0}")]
    Sink(String),
}
