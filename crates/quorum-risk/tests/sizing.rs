//! Sizing properties of the risk engine across a grid of market states.

use std::sync::Arc;

use chrono::{Duration, Utc};
use quorum_models::{
    Action, ActionTally, EnsembleDecision, Liquidity, MarketCondition, MarketRegime,
    MarketVolatility, PortfolioPoint, PortfolioSnapshot, Position, RiskParameters, Sentiment,
    TradingSession, VetoKind,
};
use quorum_risk::{
    run_stress_test, DynamicRiskEngine, HistoricalCorrelationModel, RiskInput,
    SectorCorrelationModel, StressConfig,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn decision(action: Action, confidence: f64, disagreement: f64) -> EnsembleDecision {
    EnsembleDecision {
        action,
        confidence,
        consensus_ratio: 1.0,
        disagreement_index: disagreement,
        contributing_signals: vec![],
        reasoning: "test".to_string(),
        tally: ActionTally::default(),
        excluded: vec![],
        fallback: false,
        entry_price: None,
        stop_loss: None,
        take_profit: None,
        decided_at: Utc::now(),
    }
}

/// Daily history drifting from `start` to `end` over `days`.
fn portfolio(start: Decimal, end: Decimal, days: i64) -> PortfolioSnapshot {
    let now = Utc::now();
    let step = (end - start) / Decimal::from(days);
    let historical_values = (0..=days)
        .map(|i| PortfolioPoint {
            timestamp: now - Duration::days(days - i),
            value: start + step * Decimal::from(i),
        })
        .collect();
    PortfolioSnapshot {
        total_value: end,
        open_positions: vec![Position {
            symbol: "JPM".to_string(),
            quantity: dec!(20),
            entry_price: dec!(190),
            current_price: dec!(200),
            sector: None,
        }],
        historical_values,
    }
}

fn engine() -> DynamicRiskEngine {
    DynamicRiskEngine::new(
        RiskParameters::default(),
        Arc::new(HistoricalCorrelationModel::new(
            SectorCorrelationModel::with_defaults(),
        )),
    )
    .unwrap()
}

#[test]
fn adjusted_size_never_exceeds_base_or_max() {
    let engine = engine();
    let params = engine.parameters();
    let regimes = [
        MarketRegime::TrendingUp,
        MarketRegime::Neutral,
        MarketRegime::Reversal,
        MarketRegime::Volatile,
    ];
    let sessions = [
        TradingSession::Opening,
        TradingSession::Regular,
        TradingSession::AfterHours,
    ];
    let portfolios = [
        portfolio(dec!(50000), dec!(50000), 30),
        portfolio(dec!(50000), dec!(46000), 30),
        portfolio(dec!(40000), dec!(52000), 30),
    ];

    for action in [Action::Buy, Action::Sell] {
        for confidence in [0.2, 0.55, 1.0] {
            for volatility in [0.005, 0.02, 0.04, 0.09] {
                for regime in regimes {
                    for session in sessions {
                        for portfolio in &portfolios {
                            let d = decision(action, confidence, 0.3);
                            let assessment = engine.assess(&RiskInput {
                                symbol: "AAPL",
                                decision: &d,
                                price: dec!(190),
                                portfolio,
                                volatility: MarketVolatility::from_daily(volatility),
                                condition: MarketCondition {
                                    regime,
                                    liquidity: Liquidity::Low,
                                    session,
                                    sentiment: Sentiment::Greed,
                                },
                                as_of: Utc::now(),
                            });
                            assert!(assessment.adjusted_size_usd <= assessment.base_size_usd);
                            assert!(assessment.adjusted_size_usd <= params.max_position_size_usd);
                            assert!(assessment.adjusted_size_usd >= Decimal::ZERO);
                            if assessment.veto.is_some() {
                                assert_eq!(assessment.adjusted_size_usd, Decimal::ZERO);
                            } else {
                                assert!(
                                    assessment.adjusted_size_usd >= params.min_position_size_usd
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn emergency_drawdown_always_vetoes() {
    let engine = engine();
    let snapshot = portfolio(dec!(100000), dec!(70000), 20);
    for volatility in [0.001, 0.02, 0.1] {
        let d = decision(Action::Buy, 1.0, 0.0);
        let assessment = engine.assess(&RiskInput {
            symbol: "AAPL",
            decision: &d,
            price: dec!(190),
            portfolio: &snapshot,
            volatility: MarketVolatility::from_daily(volatility),
            condition: MarketCondition::default(),
            as_of: Utc::now(),
        });
        assert_eq!(assessment.adjusted_size_usd, Decimal::ZERO);
        let veto = assessment.veto.expect("veto");
        assert_eq!(veto.kind, VetoKind::EmergencyExit);
        assert!(!veto.reason.is_empty());
    }
}

#[test]
fn long_history_attaches_value_at_risk() {
    let engine = engine();
    let mut snapshot = portfolio(dec!(100000), dec!(100000), 40);
    for (i, point) in snapshot.historical_values.iter_mut().enumerate() {
        point.value += if i % 2 == 0 { dec!(1500) } else { dec!(-1500) };
    }
    let d = decision(Action::Buy, 0.8, 0.0);
    let assessment = engine.assess(&RiskInput {
        symbol: "AAPL",
        decision: &d,
        price: dec!(190),
        portfolio: &snapshot,
        volatility: MarketVolatility::from_daily(0.02),
        condition: MarketCondition::default(),
        as_of: Utc::now(),
    });
    let var = assessment.value_at_risk_usd.expect("VaR with 40 returns");
    assert!(var > Decimal::ZERO);
    assert!(var < assessment.adjusted_size_usd);
}

#[test]
fn stress_test_on_snapshot_history() {
    let mut snapshot = portfolio(dec!(100000), dec!(98000), 60);
    for (i, point) in snapshot.historical_values.iter_mut().enumerate() {
        point.value += Decimal::from((i as i64 * 37) % 11 - 5) * dec!(400);
    }
    let result = run_stress_test(&snapshot, &StressConfig::default(), 0.15).unwrap();
    assert_eq!(result.paths, 1_000);
    assert_eq!(result.sample_returns, 61);
    assert_eq!(result.initial_value, dec!(98000));
    assert!(result.p5_terminal_value <= result.median_terminal_value);
}
