//! Boundaries to the systems the decision core reads from and reports to.

use std::sync::Arc;

use async_trait::async_trait;
use quorum_cache::SnapshotStore;
use quorum_models::{MarketData, PortfolioPoint, PortfolioSnapshot, Position, TradingDecision};
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::DecisionError;

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn current_market_data(&self, symbol: &str) -> Result<MarketData, DecisionError>;
}

#[async_trait]
pub trait PortfolioSource: Send + Sync {
    async fn open_positions(&self) -> Result<Vec<Position>, DecisionError>;

    /// Ordered oldest first.
    async fn portfolio_history(&self) -> Result<Vec<PortfolioPoint>, DecisionError>;

    async fn total_value(&self) -> Result<Decimal, DecisionError>;

    /// Daily returns for a symbol, oldest first. Empty when unknown.
    async fn symbol_returns(&self, _symbol: &str) -> Result<Vec<f64>, DecisionError> {
        Ok(Vec::new())
    }
}

/// Assemble a point-in-time snapshot from a portfolio source.
pub async fn load_snapshot(source: &dyn PortfolioSource) -> Result<PortfolioSnapshot, DecisionError> {
    Ok(PortfolioSnapshot {
        total_value: source.total_value().await?,
        open_positions: source.open_positions().await?,
        historical_values: source.portfolio_history().await?,
    })
}

/// Where finished decisions are recorded. Called fire-and-forget.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn record_decision(&self, decision: &TradingDecision) -> Result<Uuid, DecisionError>;
}

/// Market data read from the shared snapshot store.
pub struct SqliteMarketData {
    store: Arc<SnapshotStore>,
}

impl SqliteMarketData {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MarketDataSource for SqliteMarketData {
    async fn current_market_data(&self, symbol: &str) -> Result<MarketData, DecisionError> {
        self.store
            .market_data(symbol)?
            .ok_or_else(|| DecisionError::MissingMarketData(symbol.to_string()))
    }
}

/// Positions and value history read from the shared snapshot store.
///
/// The current total value is the latest history point.
pub struct SqlitePortfolio {
    store: Arc<SnapshotStore>,
}

impl SqlitePortfolio {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PortfolioSource for SqlitePortfolio {
    async fn open_positions(&self) -> Result<Vec<Position>, DecisionError> {
        Ok(self.store.open_positions()?)
    }

    async fn portfolio_history(&self) -> Result<Vec<PortfolioPoint>, DecisionError> {
        Ok(self.store.portfolio_history()?)
    }

    async fn total_value(&self) -> Result<Decimal, DecisionError> {
        self.store
            .portfolio_history()?
            .last()
            .map(|point| point.value)
            .ok_or_else(|| DecisionError::Portfolio("no portfolio history recorded".to_string()))
    }

    async fn symbol_returns(&self, symbol: &str) -> Result<Vec<f64>, DecisionError> {
        Ok(self.store.symbol_returns(symbol)?)
    }
}

/// Logs every decision as a structured event.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl DecisionSink for TracingSink {
    async fn record_decision(&self, decision: &TradingDecision) -> Result<Uuid, DecisionError> {
        info!(
            decision_id = %decision.id,
            symbol = %decision.symbol,
            action = %decision.action,
            size_usd = %decision.size_usd,
            confidence = decision.confidence,
            should_execute = decision.should_execute,
            veto = decision.veto_reason.as_deref().unwrap_or(""),
            "Trading decision"
        );
        Ok(decision.id)
    }
}
