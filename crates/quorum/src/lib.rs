//! Quorum - multi-provider trading decision core
//!
//! Fans a market snapshot out to several LLM signal providers, aggregates
//! their votes into an ensemble decision, sizes it through a dynamic risk
//! engine and emits a single [`TradingDecision`](models::TradingDecision)
//! per symbol.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use quorum::models::QuorumConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config: QuorumConfig = toml::from_str(&std::fs::read_to_string("config/quorum.toml")?)?;
//! let orchestrator = quorum::build_orchestrator(&config)?;
//! let decision = orchestrator.make_trading_decision("AAPL").await;
//! println!("{}", serde_json::to_string_pretty(&decision)?);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod error;
pub mod orchestrator;
pub mod scheduler;

pub use quorum_agents as agents;
pub use quorum_cache as cache;
pub use quorum_models as models;
pub use quorum_risk as risk;

pub use collaborators::{
    DecisionSink, MarketDataSource, PortfolioSource, SqliteMarketData, SqlitePortfolio,
    TracingSink,
};
pub use error::DecisionError;
pub use orchestrator::DecisionOrchestrator;
pub use scheduler::Scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use quorum_agents::{build_provider, EnsembleAggregator, RetryPolicy};
use quorum_cache::{CostOptimizer, ResponseCache, SnapshotStore};
use quorum_models::QuorumConfig;
use quorum_risk::{DynamicRiskEngine, HistoricalCorrelationModel, SectorCorrelationModel};

/// Build a DecisionOrchestrator from configuration.
pub fn build_orchestrator(config: &QuorumConfig) -> Result<DecisionOrchestrator, anyhow::Error> {
    config.validate().context("Invalid configuration")?;

    let store = Arc::new(
        SnapshotStore::open(&config.cache.sqlite_path)
            .with_context(|| format!("Failed to open snapshot store: {}", config.cache.sqlite_path))?,
    );

    let mut aggregator = EnsembleAggregator::new(
        config.ensemble.clone(),
        config.breaker.clone(),
        RetryPolicy::new(config.retry.clone()),
        CostOptimizer::new(config.cache.max_prompt_chars),
    );
    if config.cache.enabled {
        aggregator = aggregator.with_cache(Arc::new(ResponseCache::new(
            config.cache.max_capacity,
            Duration::from_secs(config.cache.response_ttl_seconds),
        )));
    }
    for provider_config in config.enabled_providers() {
        let provider = build_provider(provider_config)
            .with_context(|| format!("Failed to build provider {}", provider_config.id))?;
        aggregator.add_provider(provider, provider_config.weight);
    }
    if aggregator.provider_count() == 0 {
        tracing::warn!("No signal providers enabled; every decision will be HOLD");
    }

    let correlations = Arc::new(HistoricalCorrelationModel::new(
        SectorCorrelationModel::with_defaults(),
    ));
    let risk = DynamicRiskEngine::new(config.risk.clone(), correlations.clone())
        .context("Invalid risk parameters")?;

    tracing::info!(
        providers = aggregator.provider_count(),
        response_cache = config.cache.enabled,
        "Decision orchestrator ready"
    );

    Ok(DecisionOrchestrator::new(
        Arc::new(aggregator),
        Arc::new(risk),
        Arc::new(SqliteMarketData::new(store.clone())),
        Arc::new(SqlitePortfolio::new(store)),
        Arc::new(TracingSink),
        &config.orchestrator,
    )
    .with_correlation_model(correlations))
}
