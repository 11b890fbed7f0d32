//! The decision orchestrator: the one entry point callers use.
//!
//! A cycle for a symbol reads market data, runs the ensemble, loads the
//! portfolio, sizes the trade through the risk engine and combines both into
//! a [`TradingDecision`]. Nothing that goes wrong inside a cycle escapes it:
//! errors and panics become a non-executable HOLD.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Timelike, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use quorum_agents::{EnsembleAggregator, ProviderHealth};
use quorum_cache::CacheStats;
use quorum_models::{
    Action, EnsembleDecision, MarketCondition, MarketData, MarketVolatility, OrchestratorConfig,
    PortfolioSnapshot, RiskAssessment, RiskParameters, RiskParametersUpdate, TradingDecision,
    OUTPUT_SCHEMA_VERSION,
};
use quorum_risk::{
    run_stress_test, DynamicRiskEngine, HistoricalCorrelationModel, RiskInput, StressConfig,
    StressTestResult,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{load_snapshot, DecisionSink, MarketDataSource, PortfolioSource};
use crate::error::DecisionError;

pub struct DecisionOrchestrator {
    aggregator: Arc<EnsembleAggregator>,
    risk: Arc<DynamicRiskEngine>,
    market_data: Arc<dyn MarketDataSource>,
    portfolio: Arc<dyn PortfolioSource>,
    sink: Arc<dyn DecisionSink>,
    /// When set, symbol returns are pushed into it before every assessment.
    correlations: Option<Arc<HistoricalCorrelationModel>>,
    cooldown: Duration,
    cooldowns: DashMap<String, CooldownSlot>,
    events: broadcast::Sender<TradingDecision>,
}

impl DecisionOrchestrator {
    pub fn new(
        aggregator: Arc<EnsembleAggregator>,
        risk: Arc<DynamicRiskEngine>,
        market_data: Arc<dyn MarketDataSource>,
        portfolio: Arc<dyn PortfolioSource>,
        sink: Arc<dyn DecisionSink>,
        config: &OrchestratorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            aggregator,
            risk,
            market_data,
            portfolio,
            sink,
            correlations: None,
            cooldown: Duration::from_millis(config.decision_cooldown_ms),
            cooldowns: DashMap::new(),
            events,
        }
    }

    pub fn with_correlation_model(mut self, model: Arc<HistoricalCorrelationModel>) -> Self {
        self.correlations = Some(model);
        self
    }

    /// Produce a decision for `symbol`. Never fails and never panics.
    pub async fn make_trading_decision(&self, symbol: &str) -> TradingDecision {
        let started = Instant::now();

        let mut decision = match self.reserve(symbol, started) {
            Err(hold) => hold,
            Ok(reservation) => {
                let decision = match AssertUnwindSafe(self.run_cycle(symbol)).catch_unwind().await {
                    Ok(Ok(decision)) => decision,
                    Ok(Err(e)) => {
                        error!(symbol, error = %e, "Decision cycle failed");
                        failed_hold(symbol, &e.to_string())
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(symbol, panic = %message, "Decision cycle panicked");
                        failed_hold(symbol, &format!("panic: {message}"))
                    }
                };
                if decision.should_execute && !decision.action.is_hold() {
                    reservation.record_trade(started, &decision);
                }
                decision
            }
        };

        decision.processing_time_ms = started.elapsed().as_millis() as u64;

        self.persist(&decision);
        // No subscribers is fine.
        let _ = self.events.send(decision.clone());
        decision
    }

    /// Claim `symbol` for one cycle, or explain why it has to hold.
    ///
    /// The check and the claim happen under one map entry lock, so
    /// overlapping calls for a symbol never both reach the providers.
    fn reserve(&self, symbol: &str, now: Instant) -> Result<Reservation<'_>, TradingDecision> {
        let mut slot = self.cooldowns.entry(symbol.to_string()).or_default();
        if slot.in_flight {
            debug!(symbol, "Decision already in flight");
            return Err(TradingDecision::safe_hold(
                symbol,
                format!("Cooldown: a decision for {symbol} is already in progress"),
                EnsembleDecision::no_signal("concurrent cycle in progress", Vec::new()),
            ));
        }
        if let Some((at, previous)) = &slot.last_trade {
            let elapsed = now.saturating_duration_since(*at);
            if elapsed < self.cooldown {
                debug!(
                    symbol,
                    elapsed_ms = elapsed.as_millis() as u64,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "Symbol in cooldown"
                );
                let mut hold = TradingDecision::safe_hold(
                    symbol,
                    format!(
                        "Cooldown: last {} decision {} ms ago, next allowed after {} ms",
                        previous.action,
                        elapsed.as_millis(),
                        self.cooldown.as_millis()
                    ),
                    previous.ensemble_decision.clone(),
                );
                hold.confidence = previous.confidence;
                return Err(hold);
            }
        }
        slot.in_flight = true;
        Ok(Reservation {
            cooldowns: &self.cooldowns,
            symbol: symbol.to_string(),
        })
    }

    async fn run_cycle(&self, symbol: &str) -> Result<TradingDecision, DecisionError> {
        let market = self.market_data.current_market_data(symbol).await?;
        let ensemble = self.aggregator.decide(&market).await;
        let snapshot = load_snapshot(self.portfolio.as_ref()).await?;
        if let Some(model) = &self.correlations {
            self.refresh_returns(model, symbol, &snapshot).await;
        }

        let params = self.risk.parameters();
        let now = Utc::now();
        let condition = MarketCondition::from_market_data(
            &market,
            now.hour(),
            params.market_open_hour_utc,
            params.market_close_hour_utc,
        );
        let assessment = self.risk.assess(&RiskInput {
            symbol,
            decision: &ensemble,
            price: market.price,
            portfolio: &snapshot,
            volatility: MarketVolatility::from_daily(market.volatility),
            condition,
            as_of: now,
        });

        Ok(combine(&market, ensemble, assessment, &params))
    }

    /// Missing returns only weaken the correlation estimate, so failures are
    /// logged and the sector fallback takes over.
    async fn refresh_returns(
        &self,
        model: &HistoricalCorrelationModel,
        symbol: &str,
        snapshot: &PortfolioSnapshot,
    ) {
        let symbols = std::iter::once(symbol)
            .chain(snapshot.open_positions.iter().map(|p| p.symbol.as_str()));
        for s in symbols {
            match self.portfolio.symbol_returns(s).await {
                Ok(returns) if !returns.is_empty() => model.set_returns(s, returns),
                Ok(_) => {}
                Err(e) => warn!(symbol = s, error = %e, "Failed to load symbol returns"),
            }
        }
    }

    fn persist(&self, decision: &TradingDecision) {
        let sink = Arc::clone(&self.sink);
        let decision = decision.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record_decision(&decision).await {
                warn!(decision_id = %decision.id, symbol = %decision.symbol, error = %e, "Failed to persist decision");
            }
        });
    }

    /// Every decision made after this call, including cooldown and failure holds.
    pub fn subscribe(&self) -> broadcast::Receiver<TradingDecision> {
        self.events.subscribe()
    }

    pub fn provider_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.aggregator.provider_health()
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        self.aggregator.cache_stats().await
    }

    pub fn reset_circuit_breaker(&self, provider_id: &str) -> bool {
        let found = self.aggregator.reset_circuit_breaker(provider_id);
        if found {
            info!(provider = provider_id, "Circuit breaker reset");
        } else {
            warn!(provider = provider_id, "No provider to reset");
        }
        found
    }

    /// Emergency stop for every provider.
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open");
        self.aggregator.force_open_all();
    }

    pub fn risk_parameters(&self) -> RiskParameters {
        self.risk.parameters()
    }

    pub fn update_risk_parameters(
        &self,
        update: &RiskParametersUpdate,
    ) -> Result<RiskParameters, DecisionError> {
        Ok(self.risk.update_parameters(update)?)
    }

    /// Feed back the realized direction of a past decision so provider
    /// reliability tracks who called it right.
    pub fn record_outcome(&self, decision: &TradingDecision, realized: Action) {
        self.aggregator
            .record_outcome(&decision.ensemble_decision, realized);
    }

    pub async fn stress_test(&self, config: &StressConfig) -> Result<StressTestResult, DecisionError> {
        let snapshot = load_snapshot(self.portfolio.as_ref()).await?;
        let threshold = self.risk.parameters().max_drawdown_threshold;
        Ok(run_stress_test(&snapshot, config, threshold)?)
    }
}

/// Merge the ensemble view and the risk assessment into the final decision.
fn combine(
    market: &MarketData,
    ensemble: EnsembleDecision,
    assessment: RiskAssessment,
    params: &RiskParameters,
) -> TradingDecision {
    let symbol = market.symbol.clone();
    let veto_reason = assessment.veto.as_ref().map(|v| v.reason.clone());
    let executes = veto_reason.is_none() && !ensemble.action.is_hold();

    let (action, size_usd, entry_price, stop_loss, take_profit) = if executes {
        let entry = ensemble.entry_price.unwrap_or(market.price);
        let stop = ensemble
            .stop_loss
            .or_else(|| default_stop(ensemble.action, entry, params.default_stop_loss_pct));
        (
            ensemble.action,
            assessment.adjusted_size_usd,
            Some(entry),
            stop,
            ensemble.take_profit,
        )
    } else {
        (Action::Hold, Decimal::ZERO, None, None, None)
    };

    let reasoning = match &assessment.veto {
        Some(veto) => format!(
            "{} vetoed ({:?}): {}. Ensemble: {}",
            ensemble.action, veto.kind, veto.reason, ensemble.reasoning
        ),
        None if executes => format!(
            "{} | risk {:?}, size {} USD (multiplier {:.2})",
            ensemble.reasoning,
            assessment.risk_level,
            assessment.adjusted_size_usd,
            assessment.cumulative_multiplier
        ),
        None => ensemble.reasoning.clone(),
    };

    if let Some(reason) = &veto_reason {
        info!(symbol = %symbol, proposed = %ensemble.action, reason = %reason, "Risk veto");
    }

    TradingDecision {
        id: Uuid::new_v4(),
        schema_version: OUTPUT_SCHEMA_VERSION,
        symbol,
        action,
        size_usd,
        entry_price,
        stop_loss,
        take_profit,
        confidence: ensemble.confidence,
        should_execute: executes,
        ensemble_decision: ensemble,
        risk_assessment: Some(assessment),
        veto_reason,
        reasoning,
        decided_at: Utc::now(),
        processing_time_ms: 0,
    }
}

/// Stop placed `pct` percent against the trade direction.
fn default_stop(action: Action, entry: Decimal, pct: f64) -> Option<Decimal> {
    let distance = Decimal::from_f64(pct / 100.0)?;
    let factor = match action {
        Action::Buy => Decimal::ONE - distance,
        Action::Sell => Decimal::ONE + distance,
        Action::Hold => return None,
    };
    Some((entry * factor).round_dp(2))
}

#[derive(Default)]
struct CooldownSlot {
    in_flight: bool,
    /// Last executed non-HOLD decision.
    last_trade: Option<(Instant, TradingDecision)>,
}

/// Exclusive claim on a symbol for one cycle. Dropping it frees the symbol,
/// including when the caller abandons the cycle midway.
struct Reservation<'a> {
    cooldowns: &'a DashMap<String, CooldownSlot>,
    symbol: String,
}

impl Reservation<'_> {
    fn record_trade(&self, at: Instant, decision: &TradingDecision) {
        if let Some(mut slot) = self.cooldowns.get_mut(&self.symbol) {
            slot.last_trade = Some((at, decision.clone()));
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if let Some(mut slot) = self.cooldowns.get_mut(&self.symbol) {
            slot.in_flight = false;
        }
    }
}

fn failed_hold(symbol: &str, error: &str) -> TradingDecision {
    TradingDecision::safe_hold(
        symbol,
        format!("Decision cycle failed: {error}"),
        EnsembleDecision::no_signal(format!("cycle aborted: {error}"), Vec::new()),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
