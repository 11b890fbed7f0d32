//! End-to-end aggregation rounds against scripted providers.
//!
//! Each test wires `ScriptedProvider`s into an `EnsembleAggregator` with the
//! real breaker, retry and cache layers and checks the resulting decision.

use std::sync::Arc;
use std::time::Duration;

use quorum_agents::test_support::{sample_market, ScriptedProvider};
use quorum_agents::{CircuitState, EnsembleAggregator, ProviderError, RetryPolicy};
use quorum_cache::{CostOptimizer, ResponseCache};
use quorum_models::{Action, CircuitBreakerConfig, EnsembleConfig, RetryConfig};
use rust_decimal_macros::dec;

fn aggregator(ensemble: EnsembleConfig, breaker: CircuitBreakerConfig, retry: RetryConfig) -> EnsembleAggregator {
    EnsembleAggregator::new(
        ensemble,
        breaker,
        RetryPolicy::new(retry),
        CostOptimizer::new(6_000),
    )
}

fn default_aggregator() -> EnsembleAggregator {
    aggregator(
        EnsembleConfig::default(),
        CircuitBreakerConfig::default(),
        RetryConfig::default(),
    )
}

fn register(aggregator: &mut EnsembleAggregator, provider: ScriptedProvider) -> Arc<ScriptedProvider> {
    let provider = Arc::new(provider);
    aggregator.add_provider(provider.clone(), 1.0);
    provider
}

#[tokio::test]
async fn majority_buy_outvotes_single_sell() {
    let mut agg = default_aggregator();
    register(&mut agg, ScriptedProvider::new("claude", Action::Buy, 0.9));
    register(&mut agg, ScriptedProvider::new("openai", Action::Buy, 0.8));
    register(&mut agg, ScriptedProvider::new("deepseek", Action::Buy, 0.3));
    register(&mut agg, ScriptedProvider::new("anthropic", Action::Sell, 0.6));

    let decision = agg.decide(&sample_market("AAPL")).await;

    assert_eq!(decision.action, Action::Buy);
    assert!((decision.consensus_ratio - 0.75).abs() < 1e-12);
    assert!(decision.confidence > 0.6 && decision.confidence < 0.7);
    assert!(decision.disagreement_index > 0.0);
    assert!(!decision.fallback);
    assert_eq!(decision.contributing_signals.len(), 4);
    assert!(decision.excluded.is_empty());
}

#[tokio::test]
async fn all_breakers_open_yields_zero_confidence_hold() {
    let mut agg = default_aggregator();
    let a = register(&mut agg, ScriptedProvider::new("a", Action::Buy, 0.9));
    let b = register(&mut agg, ScriptedProvider::new("b", Action::Buy, 0.9));
    agg.force_open_all();

    let decision = agg.decide(&sample_market("AAPL")).await;

    assert_eq!(decision.action, Action::Hold);
    assert_eq!(decision.confidence, 0.0);
    assert!(decision.contributing_signals.is_empty());
    assert_eq!(decision.excluded.len(), 2);
    assert!(decision.excluded.iter().all(|e| e.code == "circuit_open"));
    assert_eq!(a.calls() + b.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_provider_is_excluded_at_deadline() {
    let ensemble = EnsembleConfig {
        aggregation_timeout_ms: 1_000,
        ..EnsembleConfig::default()
    };
    let mut agg = aggregator(ensemble, CircuitBreakerConfig::default(), RetryConfig::default());
    register(&mut agg, ScriptedProvider::new("fast-a", Action::Sell, 0.7));
    register(&mut agg, ScriptedProvider::new("fast-b", Action::Sell, 0.5));
    register(
        &mut agg,
        ScriptedProvider::new("slow", Action::Buy, 0.99).with_delay(Duration::from_secs(30)),
    );

    let decision = agg.decide(&sample_market("MSFT")).await;

    assert_eq!(decision.action, Action::Sell);
    assert_eq!(decision.contributing_signals.len(), 2);
    assert_eq!(decision.excluded.len(), 1);
    assert_eq!(decision.excluded[0].provider_id, "slow");
    assert_eq!(decision.excluded[0].code, "deadline");
    assert_eq!(decision.disagreement_index, 0.0);

    // An abandoned call records neither success nor failure.
    let health = agg.provider_health();
    assert_eq!(health["slow"].breaker.state, CircuitState::Closed);
    assert_eq!(health["slow"].breaker.consecutive_failures, 0);
}

#[tokio::test]
async fn below_quorum_falls_back_to_single_responder() {
    let ensemble = EnsembleConfig {
        min_providers: 2,
        ..EnsembleConfig::default()
    };
    let mut agg = aggregator(ensemble, CircuitBreakerConfig::default(), RetryConfig::default());
    register(&mut agg, ScriptedProvider::new("only", Action::Sell, 0.65));
    register(
        &mut agg,
        ScriptedProvider::always_failing("keyless", ProviderError::Auth("missing key".into())),
    );

    let decision = agg.decide(&sample_market("TSLA")).await;

    assert!(decision.fallback);
    assert_eq!(decision.action, Action::Sell);
    assert_eq!(decision.confidence, 0.65);
    assert_eq!(decision.consensus_ratio, 1.0);
    assert_eq!(decision.disagreement_index, 0.0);
    assert_eq!(decision.excluded.len(), 1);
    assert_eq!(decision.excluded[0].code, "auth");
}

#[tokio::test]
async fn even_split_resolves_to_hold() {
    let mut agg = default_aggregator();
    register(&mut agg, ScriptedProvider::new("bull", Action::Buy, 0.8));
    register(&mut agg, ScriptedProvider::new("bear", Action::Sell, 0.8));

    let decision = agg.decide(&sample_market("NVDA")).await;

    assert_eq!(decision.action, Action::Hold);
    assert!(!decision.fallback);
    assert!(decision.disagreement_index > 0.0);
    assert!(decision.reasoning.contains("tie"));
}

#[tokio::test]
async fn identical_requests_are_served_from_cache() {
    let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
    let mut agg = default_aggregator().with_cache(cache);
    let a = register(
        &mut agg,
        ScriptedProvider::new("a", Action::Buy, 0.7).with_stop_loss(dec!(95)),
    );
    let b = register(&mut agg, ScriptedProvider::new("b", Action::Buy, 0.6));

    let first = agg.decide(&sample_market("AAPL")).await;
    let second = agg.decide(&sample_market("AAPL")).await;

    assert_eq!(first.action, second.action);
    assert_eq!(second.stop_loss, Some(dec!(95)));
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);

    let stats = agg.cache_stats().await.unwrap();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);

    agg.decide(&sample_market("GOOG")).await;
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn emergency_stop_is_not_bypassed_by_cached_signals() {
    let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
    let mut agg = default_aggregator().with_cache(cache);
    let a = register(&mut agg, ScriptedProvider::new("a", Action::Buy, 0.9));
    let b = register(&mut agg, ScriptedProvider::new("b", Action::Buy, 0.9));

    let before = agg.decide(&sample_market("AAPL")).await;
    assert_eq!(before.action, Action::Buy);

    agg.force_open_all();
    let stopped = agg.decide(&sample_market("AAPL")).await;

    assert_eq!(stopped.action, Action::Hold);
    assert_eq!(stopped.confidence, 0.0);
    assert!(stopped.contributing_signals.is_empty());
    assert_eq!(stopped.excluded.len(), 2);
    assert!(stopped.excluded.iter().all(|e| e.code == "circuit_open"));
    assert_eq!(a.calls() + b.calls(), 2);

    // Signals cached before the stop are gone once the breakers close again.
    assert!(agg.reset_circuit_breaker("a"));
    assert!(agg.reset_circuit_breaker("b"));
    let resumed = agg.decide(&sample_market("AAPL")).await;
    assert_eq!(resumed.action, Action::Buy);
    assert_eq!(a.calls(), 2);
    assert_eq!(b.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried() {
    let mut agg = default_aggregator();
    let flaky = register(
        &mut agg,
        ScriptedProvider::new("flaky", Action::Buy, 0.8)
            .failing_with([ProviderError::Network("connection reset".into())]),
    );
    register(&mut agg, ScriptedProvider::new("steady", Action::Buy, 0.6));

    let decision = agg.decide(&sample_market("AMZN")).await;

    assert_eq!(flaky.calls(), 2);
    assert_eq!(decision.action, Action::Buy);
    assert_eq!(decision.contributing_signals.len(), 2);
}

#[tokio::test]
async fn repeated_failures_open_the_breaker() {
    let breaker = CircuitBreakerConfig {
        failure_threshold: 2,
        ..CircuitBreakerConfig::default()
    };
    let retry = RetryConfig {
        max_attempts: 1,
        ..RetryConfig::default()
    };
    let mut agg = aggregator(EnsembleConfig::default(), breaker, retry);
    let broken = register(
        &mut agg,
        ScriptedProvider::always_failing("broken", ProviderError::Network("refused".into())),
    );
    register(&mut agg, ScriptedProvider::new("ok", Action::Hold, 0.5));

    let first = agg.decide(&sample_market("AAPL")).await;
    assert_eq!(first.excluded[0].code, "retry_exhausted");
    agg.decide(&sample_market("AAPL")).await;
    let third = agg.decide(&sample_market("AAPL")).await;

    assert_eq!(third.excluded[0].code, "circuit_open");
    assert_eq!(broken.calls(), 2);
    assert_eq!(agg.provider_health()["broken"].breaker.state, CircuitState::Open);

    assert!(agg.reset_circuit_breaker("broken"));
    assert!(!agg.reset_circuit_breaker("missing"));
    assert_eq!(agg.provider_health()["broken"].breaker.state, CircuitState::Closed);
}

#[tokio::test]
async fn panicking_provider_is_contained() {
    let mut agg = default_aggregator();
    register(&mut agg, ScriptedProvider::panicking("crashy"));
    register(&mut agg, ScriptedProvider::new("a", Action::Sell, 0.7));
    register(&mut agg, ScriptedProvider::new("b", Action::Sell, 0.7));

    let decision = agg.decide(&sample_market("META")).await;

    assert_eq!(decision.action, Action::Sell);
    assert_eq!(decision.excluded.len(), 1);
    assert_eq!(decision.excluded[0].provider_id, "crashy");
    assert_eq!(decision.excluded[0].code, "panicked");
}

#[tokio::test]
async fn unreliable_providers_lose_influence() {
    let mut agg = default_aggregator();
    register(&mut agg, ScriptedProvider::new("a", Action::Buy, 0.8));
    register(&mut agg, ScriptedProvider::new("b", Action::Buy, 0.8));
    register(&mut agg, ScriptedProvider::new("c", Action::Sell, 0.8));

    assert_eq!(agg.decide(&sample_market("AAPL")).await.action, Action::Buy);

    for _ in 0..10 {
        agg.reliability().record("a", false);
        agg.reliability().record("b", false);
    }
    let decision = agg.decide(&sample_market("AAPL")).await;

    assert_eq!(decision.action, Action::Sell);
    assert!(agg.provider_health()["a"].reliability < 0.4);
}
