//! End-to-end decision cycles with scripted providers and in-memory collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quorum::agents::test_support::{sample_market, ScriptedProvider};
use quorum::agents::{EnsembleAggregator, RetryPolicy, SignalProvider};
use quorum::cache::CostOptimizer;
use quorum::models::{
    Action, CircuitBreakerConfig, EnsembleConfig, MarketData, OrchestratorConfig, PortfolioPoint,
    Position, RiskParameters, RiskParametersUpdate, RetryConfig, TradingDecision,
};
use quorum::risk::{DynamicRiskEngine, SectorCorrelationModel, StressConfig};
use quorum::{
    DecisionError, DecisionOrchestrator, DecisionSink, MarketDataSource, PortfolioSource,
    Scheduler,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use uuid::Uuid;

struct StaticMarket {
    data: HashMap<String, MarketData>,
}

impl StaticMarket {
    fn with(symbols: &[&str]) -> Self {
        Self {
            data: symbols
                .iter()
                .map(|s| (s.to_string(), sample_market(s)))
                .collect(),
        }
    }
}

#[async_trait]
impl MarketDataSource for StaticMarket {
    async fn current_market_data(&self, symbol: &str) -> Result<MarketData, DecisionError> {
        self.data
            .get(symbol)
            .cloned()
            .ok_or_else(|| DecisionError::MissingMarketData(symbol.to_string()))
    }
}

struct StaticPortfolio {
    positions: Vec<Position>,
    history: Vec<PortfolioPoint>,
    panics: bool,
}

impl StaticPortfolio {
    /// One point per day, oldest first, the last being today.
    fn with_history(values: &[Decimal]) -> Self {
        let now = Utc::now();
        let last = values.len() as i64 - 1;
        Self {
            positions: Vec::new(),
            history: values
                .iter()
                .enumerate()
                .map(|(i, value)| PortfolioPoint {
                    timestamp: now - chrono::Duration::days(last - i as i64),
                    value: *value,
                })
                .collect(),
            panics: false,
        }
    }

    fn flat() -> Self {
        Self::with_history(&[dec!(100000); 30])
    }
}

#[async_trait]
impl PortfolioSource for StaticPortfolio {
    async fn open_positions(&self) -> Result<Vec<Position>, DecisionError> {
        Ok(self.positions.clone())
    }

    async fn portfolio_history(&self) -> Result<Vec<PortfolioPoint>, DecisionError> {
        Ok(self.history.clone())
    }

    async fn total_value(&self) -> Result<Decimal, DecisionError> {
        if self.panics {
            panic!("portfolio store corrupted");
        }
        self.history
            .last()
            .map(|p| p.value)
            .ok_or_else(|| DecisionError::Portfolio("empty".to_string()))
    }
}

/// Forwards every recorded decision id to a channel.
struct ChannelSink {
    tx: mpsc::UnboundedSender<Uuid>,
}

#[async_trait]
impl DecisionSink for ChannelSink {
    async fn record_decision(&self, decision: &TradingDecision) -> Result<Uuid, DecisionError> {
        let _ = self.tx.send(decision.id);
        Ok(decision.id)
    }
}

struct FailingSink;

#[async_trait]
impl DecisionSink for FailingSink {
    async fn record_decision(&self, _decision: &TradingDecision) -> Result<Uuid, DecisionError> {
        Err(DecisionError::Sink("database offline".to_string()))
    }
}

fn aggregator(providers: &[Arc<ScriptedProvider>]) -> Arc<EnsembleAggregator> {
    let mut aggregator = EnsembleAggregator::new(
        EnsembleConfig::default(),
        CircuitBreakerConfig::default(),
        RetryPolicy::new(RetryConfig::default()),
        CostOptimizer::new(6_000),
    );
    for provider in providers {
        aggregator.add_provider(Arc::clone(provider) as Arc<dyn SignalProvider>, 1.0);
    }
    Arc::new(aggregator)
}

fn bullish_providers() -> Vec<Arc<ScriptedProvider>> {
    vec![
        Arc::new(ScriptedProvider::new("claude", Action::Buy, 0.9)),
        Arc::new(ScriptedProvider::new("openai", Action::Buy, 0.9)),
        Arc::new(ScriptedProvider::new("deepseek", Action::Buy, 0.9)),
    ]
}

fn orchestrator(
    providers: &[Arc<ScriptedProvider>],
    market: StaticMarket,
    portfolio: StaticPortfolio,
    sink: Arc<dyn DecisionSink>,
) -> DecisionOrchestrator {
    let risk = DynamicRiskEngine::new(
        RiskParameters::default(),
        Arc::new(SectorCorrelationModel::with_defaults()),
    )
    .unwrap();
    DecisionOrchestrator::new(
        aggregator(providers),
        Arc::new(risk),
        Arc::new(market),
        Arc::new(portfolio),
        sink,
        &OrchestratorConfig::default(),
    )
}

fn quiet_sink() -> Arc<dyn DecisionSink> {
    let (tx, _rx) = mpsc::unbounded_channel();
    Arc::new(ChannelSink { tx })
}

#[tokio::test]
async fn unanimous_buy_is_sized_and_executable() {
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );
    let decision = orchestrator.make_trading_decision("AAPL").await;

    assert_eq!(decision.action, Action::Buy);
    assert!(decision.should_execute);
    assert!(decision.veto_reason.is_none());
    assert!(decision.size_usd > Decimal::ZERO);
    // base = 10000 x 0.9 with no disagreement
    assert!(decision.size_usd <= dec!(9000));
    assert_eq!(decision.entry_price, Some(dec!(100)));
    assert_eq!(decision.stop_loss, Some(dec!(98)));
    let assessment = decision.risk_assessment.expect("assessed");
    assert_eq!(assessment.base_size_usd, dec!(9000));
}

#[tokio::test(start_paused = true)]
async fn second_decision_within_cooldown_is_not_executed() {
    let providers = bullish_providers();
    let orchestrator = orchestrator(
        &providers,
        StaticMarket::with(&["AAPL", "MSFT"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );

    let first = orchestrator.make_trading_decision("AAPL").await;
    assert!(first.should_execute);

    let second = orchestrator.make_trading_decision("AAPL").await;
    assert_eq!(second.action, Action::Hold);
    assert!(!second.should_execute);
    assert!(second.reasoning.starts_with("Cooldown"));
    // The cooldown short-circuits before any provider is asked.
    assert_eq!(providers[0].calls(), 1);

    // Other symbols are unaffected.
    assert!(orchestrator.make_trading_decision("MSFT").await.should_execute);

    tokio::time::advance(Duration::from_secs(61)).await;
    let third = orchestrator.make_trading_decision("AAPL").await;
    assert!(third.should_execute);
}

#[tokio::test(start_paused = true)]
async fn overlapping_decisions_for_one_symbol_execute_once() {
    let providers: Vec<Arc<ScriptedProvider>> = ["claude", "openai", "deepseek"]
        .into_iter()
        .map(|id| {
            Arc::new(
                ScriptedProvider::new(id, Action::Buy, 0.9)
                    .with_delay(Duration::from_millis(50)),
            )
        })
        .collect();
    let orchestrator = orchestrator(
        &providers,
        StaticMarket::with(&["AAPL", "MSFT"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );

    let (first, second, other) = tokio::join!(
        orchestrator.make_trading_decision("AAPL"),
        orchestrator.make_trading_decision("AAPL"),
        orchestrator.make_trading_decision("MSFT"),
    );

    let executed = [&first, &second].iter().filter(|d| d.should_execute).count();
    assert_eq!(executed, 1);
    let late = if first.should_execute { &second } else { &first };
    assert_eq!(late.action, Action::Hold);
    assert!(late.reasoning.starts_with("Cooldown"));
    assert!(other.should_execute);
    // One AAPL round and one MSFT round.
    assert!(providers.iter().all(|p| p.calls() == 2));

    // The finished cycle leaves a regular cooldown behind.
    let after = orchestrator.make_trading_decision("AAPL").await;
    assert!(!after.should_execute);
    assert!(after.reasoning.starts_with("Cooldown: last BUY"));
}

#[tokio::test]
async fn failed_cycle_releases_the_symbol() {
    let providers = bullish_providers();
    let orchestrator = orchestrator(
        &providers,
        StaticMarket::with(&["MSFT"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );

    let first = orchestrator.make_trading_decision("AAPL").await;
    assert!(first.reasoning.starts_with("Decision cycle failed"));
    let second = orchestrator.make_trading_decision("AAPL").await;
    assert!(second.reasoning.starts_with("Decision cycle failed"));
}

#[tokio::test]
async fn hold_does_not_start_a_cooldown() {
    let providers = vec![
        Arc::new(ScriptedProvider::new("claude", Action::Hold, 0.7)),
        Arc::new(ScriptedProvider::new("openai", Action::Hold, 0.6)),
    ];
    let orchestrator = orchestrator(
        &providers,
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );
    orchestrator.make_trading_decision("AAPL").await;
    orchestrator.make_trading_decision("AAPL").await;
    assert_eq!(providers[0].calls(), 2);
}

#[tokio::test]
async fn missing_market_data_degrades_to_hold() {
    let providers = bullish_providers();
    let orchestrator = orchestrator(
        &providers,
        StaticMarket::with(&[]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );
    let decision = orchestrator.make_trading_decision("AAPL").await;

    assert_eq!(decision.action, Action::Hold);
    assert_eq!(decision.confidence, 0.0);
    assert!(!decision.should_execute);
    assert!(decision.reasoning.contains("No market data for AAPL"));
    assert!(decision.risk_assessment.is_none());
    assert_eq!(providers[0].calls(), 0);
}

#[tokio::test]
async fn panicking_collaborator_is_contained() {
    let mut portfolio = StaticPortfolio::flat();
    portfolio.panics = true;
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        portfolio,
        quiet_sink(),
    );
    let decision = orchestrator.make_trading_decision("AAPL").await;

    assert_eq!(decision.action, Action::Hold);
    assert_eq!(decision.confidence, 0.0);
    assert!(decision.reasoning.contains("portfolio store corrupted"));

    // The orchestrator keeps working afterwards.
    let again = orchestrator.make_trading_decision("AAPL").await;
    assert_eq!(again.action, Action::Hold);
}

#[tokio::test]
async fn emergency_drawdown_veto_becomes_hold() {
    let portfolio = StaticPortfolio::with_history(&[dec!(100000), dec!(70000), dec!(70000)]);
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        portfolio,
        quiet_sink(),
    );
    let decision = orchestrator.make_trading_decision("AAPL").await;

    assert_eq!(decision.action, Action::Hold);
    assert!(!decision.should_execute);
    assert_eq!(decision.size_usd, Decimal::ZERO);
    assert!(decision.veto_reason.is_some());
    assert_eq!(decision.ensemble_decision.action, Action::Buy);
    assert!(decision.risk_assessment.unwrap().veto.is_some());
}

#[tokio::test]
async fn decisions_are_broadcast_and_persisted() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::flat(),
        Arc::new(ChannelSink { tx }),
    );
    let mut events = orchestrator.subscribe();

    let decision = orchestrator.make_trading_decision("AAPL").await;

    let published = events.recv().await.unwrap();
    assert_eq!(published.id, decision.id);
    let persisted = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted, decision.id);
}

#[tokio::test]
async fn sink_failure_does_not_block_decisions() {
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::flat(),
        Arc::new(FailingSink),
    );
    let decision = orchestrator.make_trading_decision("AAPL").await;
    assert!(decision.should_execute);
}

#[tokio::test]
async fn outcome_feedback_lowers_reliability_of_wrong_calls() {
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );
    let decision = orchestrator.make_trading_decision("AAPL").await;
    orchestrator.record_outcome(&decision, Action::Sell);

    let health = orchestrator.provider_health();
    assert_eq!(health.len(), 3);
    assert!(health.values().all(|h| h.reliability < 1.0));
}

#[tokio::test]
async fn admin_surface() {
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    );

    assert!(orchestrator.reset_circuit_breaker("claude"));
    assert!(!orchestrator.reset_circuit_breaker("nobody"));
    assert!(orchestrator.cache_stats().await.is_none());

    let rejected = orchestrator.update_risk_parameters(&RiskParametersUpdate {
        max_position_size_usd: Some(dec!(-5)),
        ..Default::default()
    });
    assert!(matches!(rejected, Err(DecisionError::Risk(_))));
    assert_eq!(
        orchestrator.risk_parameters().max_position_size_usd,
        dec!(10000)
    );

    let updated = orchestrator
        .update_risk_parameters(&RiskParametersUpdate {
            max_position_size_usd: Some(dec!(2000)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(updated.max_position_size_usd, dec!(2000));
    let decision = orchestrator.make_trading_decision("AAPL").await;
    assert!(decision.size_usd <= dec!(2000));

    orchestrator.force_open_all();
    let stopped = orchestrator.make_trading_decision("MSFT").await;
    assert_eq!(stopped.action, Action::Hold);
    assert!(!stopped.should_execute);
}

#[tokio::test]
async fn stress_test_uses_portfolio_history() {
    let values: Vec<Decimal> = (0..40)
        .map(|i| dec!(100000) + Decimal::from((i * 37) % 11 - 5) * dec!(300))
        .collect();
    let orchestrator = orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::with_history(&values),
        quiet_sink(),
    );
    let result = orchestrator
        .stress_test(&StressConfig {
            paths: 200,
            ..StressConfig::default()
        })
        .await
        .unwrap();
    assert_eq!(result.sample_returns, 39);
    assert_eq!(result.breach_threshold, 0.15);

    let short = orchestrator_with_short_history();
    assert!(matches!(
        short.stress_test(&StressConfig::default()).await,
        Err(DecisionError::Risk(_))
    ));
}

fn orchestrator_with_short_history() -> DecisionOrchestrator {
    orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL"]),
        StaticPortfolio::with_history(&[dec!(100000), dec!(100500)]),
        quiet_sink(),
    )
}

#[tokio::test(start_paused = true)]
async fn scheduler_runs_rounds_until_cancelled() {
    let orchestrator = Arc::new(orchestrator(
        &bullish_providers(),
        StaticMarket::with(&["AAPL", "MSFT"]),
        StaticPortfolio::flat(),
        quiet_sink(),
    ));
    let mut events = orchestrator.subscribe();
    let scheduler = Arc::new(Scheduler::new(
        orchestrator,
        vec!["AAPL".to_string(), "MSFT".to_string()],
        Duration::from_secs(30),
    ));
    let cancel = scheduler.cancel_token();
    let handle = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    // Two full rounds: the second lands inside the cooldown.
    let mut decisions = Vec::new();
    while decisions.len() < 4 {
        decisions.push(events.recv().await.unwrap());
    }
    cancel.cancel();
    let rounds = handle.await.unwrap();

    assert!(rounds >= 2);
    assert_eq!(decisions.iter().filter(|d| d.should_execute).count(), 2);
    assert!(decisions[2..].iter().all(|d| !d.should_execute));
}
