//! Weighted consensus over concurrently queried signal providers.
//!
//! Collection policy: every enabled provider is queried at once and the round
//! waits until all of them have answered or the aggregation deadline passes,
//! whichever comes first. There is no early return on quorum. Calls still in
//! flight at the deadline are aborted and their providers excluded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use quorum_cache::{cache_key, CacheStats, CostOptimizer, ResponseCache};
use quorum_models::{
    Action, ActionTally, CircuitBreakerConfig, EnsembleConfig, EnsembleDecision, ExcludedProvider,
    MarketData, ProviderSignal,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitState};
use crate::error::ProviderError;
use crate::prompts::build_signal_request;
use crate::provider::{ProviderRequest, SignalProvider};
use crate::reliability::ReliabilityTracker;
use crate::retry::RetryPolicy;

/// Weight ties within this tolerance count as ties.
const TIE_EPSILON: f64 = 1e-9;

/// Reliability never drags a vote below this share of its configured weight.
const MIN_RELIABILITY_FACTOR: f64 = 0.05;

/// Slow responses never lose more than half their weight.
const MIN_LATENCY_FACTOR: f64 = 0.5;

/// Latency discount: full weight up to `reference_ms`, then `reference / latency`.
pub fn latency_factor(latency_ms: u64, reference_ms: u64) -> f64 {
    if reference_ms == 0 || latency_ms <= reference_ms {
        return 1.0;
    }
    (reference_ms as f64 / latency_ms as f64).max(MIN_LATENCY_FACTOR)
}

/// `configured_weight × reliability × latency_factor`.
pub fn vote_weight(configured_weight: f64, reliability: f64, latency_ms: u64, reference_ms: u64) -> f64 {
    configured_weight
        * reliability.clamp(MIN_RELIABILITY_FACTOR, 1.0)
        * latency_factor(latency_ms, reference_ms)
}

/// A signal and the weight its vote carries this round.
#[derive(Debug, Clone)]
pub struct WeightedSignal {
    pub signal: ProviderSignal,
    pub weight: f64,
}

/// Turn the signals that arrived in time into one decision.
///
/// Fewer than `min_providers` responders falls back to the single heaviest
/// responder. No responders at all yields a zero-confidence HOLD. Otherwise
/// the heaviest action by summed weight wins, and any tie at the top is HOLD.
pub fn build_consensus(
    mut signals: Vec<WeightedSignal>,
    excluded: Vec<ExcludedProvider>,
    min_providers: usize,
) -> EnsembleDecision {
    if signals.is_empty() {
        return EnsembleDecision::no_signal(
            "No provider responded; holding by default",
            excluded,
        );
    }

    if signals.len() < min_providers {
        // Stable: among equal weights the first configured provider wins.
        let best_index = signals
            .iter()
            .enumerate()
            .fold(0, |best, (i, s)| {
                if s.weight > signals[best].weight + TIE_EPSILON {
                    i
                } else {
                    best
                }
            });
        let best = signals.swap_remove(best_index);
        let mut contributing = vec![best.signal.clone()];
        contributing.extend(signals.into_iter().map(|s| s.signal));
        let mut tally = ActionTally::default();
        tally.add(best.signal.action, best.weight);
        return EnsembleDecision {
            action: best.signal.action,
            confidence: best.signal.confidence,
            consensus_ratio: 1.0,
            disagreement_index: 0.0,
            reasoning: format!(
                "Fallback to {} ({} of {} required providers responded): {}",
                best.signal.provider_id,
                contributing.len(),
                min_providers,
                best.signal.reasoning
            ),
            contributing_signals: contributing,
            tally,
            excluded,
            fallback: true,
            entry_price: best.signal.entry_price,
            stop_loss: best.signal.stop_loss,
            take_profit: best.signal.take_profit,
            decided_at: Utc::now(),
        };
    }

    let mut tally = ActionTally::default();
    for s in &signals {
        tally.add(s.signal.action, s.weight);
    }
    let total = tally.total();

    let top = Action::ALL
        .iter()
        .map(|a| tally.get(*a))
        .fold(f64::MIN, f64::max);
    let leaders: Vec<Action> = Action::ALL
        .iter()
        .copied()
        .filter(|a| (tally.get(*a) - top).abs() <= TIE_EPSILON)
        .collect();
    let action = if leaders.len() == 1 {
        leaders[0]
    } else {
        Action::Hold
    };

    let agreeing: Vec<&WeightedSignal> =
        signals.iter().filter(|s| s.signal.action == action).collect();
    let dissenting: Vec<&WeightedSignal> =
        signals.iter().filter(|s| s.signal.action != action).collect();

    let confidence = weighted_mean_confidence(&agreeing);
    let consensus_ratio = agreeing.len() as f64 / signals.len() as f64;
    let disagreement_index = disagreement_index(&tally, total, &dissenting);

    let votes: Vec<String> = signals
        .iter()
        .map(|s| {
            format!(
                "{}={}@{:.2} (w {:.2})",
                s.signal.provider_id, s.signal.action, s.signal.confidence, s.weight
            )
        })
        .collect();
    let tie_note = if leaders.len() > 1 { " after a tie" } else { "" };
    let reasoning = format!(
        "{action}{tie_note} by weighted vote {:.2}/{:.2}; {} of {} providers agree; votes: {}",
        tally.get(action),
        total,
        agreeing.len(),
        signals.len(),
        votes.join(", ")
    );

    EnsembleDecision {
        action,
        confidence,
        consensus_ratio,
        disagreement_index,
        entry_price: weighted_level(&agreeing, |s| s.entry_price),
        stop_loss: weighted_level(&agreeing, |s| s.stop_loss),
        take_profit: weighted_level(&agreeing, |s| s.take_profit),
        contributing_signals: signals.into_iter().map(|s| s.signal).collect(),
        reasoning,
        tally,
        excluded,
        fallback: false,
        decided_at: Utc::now(),
    }
}

fn weighted_mean_confidence(signals: &[&WeightedSignal]) -> f64 {
    let weight: f64 = signals.iter().map(|s| s.weight).sum();
    if weight <= 0.0 {
        return 0.0;
    }
    let sum: f64 = signals.iter().map(|s| s.weight * s.signal.confidence).sum();
    (sum / weight).clamp(0.0, 1.0)
}

/// Normalized vote dispersion scaled by how confident the dissenters were.
///
/// The dispersion term is the Gini impurity of the weight shares over the
/// three actions divided by its maximum (2/3), so it is zero exactly when a
/// single action holds all the weight. The confidence term ranges over
/// `[0.5, 1]`, keeping the product positive whenever anyone dissents.
fn disagreement_index(tally: &ActionTally, total: f64, dissenting: &[&WeightedSignal]) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let impurity = 1.0
        - Action::ALL
            .iter()
            .map(|a| (tally.get(*a) / total).powi(2))
            .sum::<f64>();
    if impurity <= TIE_EPSILON {
        return 0.0;
    }
    let dispersion = (impurity / (2.0 / 3.0)).clamp(0.0, 1.0);
    let dissent_confidence = weighted_mean_confidence(dissenting);
    (dispersion * (0.5 + 0.5 * dissent_confidence)).clamp(0.0, 1.0)
}

fn weighted_level(
    signals: &[&WeightedSignal],
    level: impl Fn(&ProviderSignal) -> Option<Decimal>,
) -> Option<Decimal> {
    let mut weighted_sum = Decimal::ZERO;
    let mut weight_sum = Decimal::ZERO;
    for s in signals {
        if let (Some(price), Some(weight)) = (level(&s.signal), Decimal::from_f64(s.weight)) {
            weighted_sum += price * weight;
            weight_sum += weight;
        }
    }
    if weight_sum.is_zero() {
        None
    } else {
        Some((weighted_sum / weight_sum).round_dp(8))
    }
}

struct ProviderSlot {
    provider: Arc<dyn SignalProvider>,
    weight: f64,
    breaker: Arc<CircuitBreaker>,
}

/// Health of one provider as seen by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderHealth {
    pub weight: f64,
    pub reliability: f64,
    pub breaker: BreakerMetrics,
}

pub struct EnsembleAggregator {
    providers: Vec<ProviderSlot>,
    config: EnsembleConfig,
    breaker_config: CircuitBreakerConfig,
    retry: Arc<RetryPolicy>,
    cache: Option<Arc<ResponseCache>>,
    optimizer: CostOptimizer,
    reliability: Arc<ReliabilityTracker>,
}

impl EnsembleAggregator {
    pub fn new(
        config: EnsembleConfig,
        breaker_config: CircuitBreakerConfig,
        retry: RetryPolicy,
        optimizer: CostOptimizer,
    ) -> Self {
        let reliability = Arc::new(ReliabilityTracker::new(config.reliability_alpha));
        Self {
            providers: Vec::new(),
            config,
            breaker_config,
            retry: Arc::new(retry),
            cache: None,
            optimizer,
            reliability,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a provider with its configured vote weight. Each provider gets
    /// its own circuit breaker.
    pub fn add_provider(&mut self, provider: Arc<dyn SignalProvider>, weight: f64) {
        let breaker = Arc::new(CircuitBreaker::new(provider.id(), &self.breaker_config));
        self.providers.push(ProviderSlot {
            provider,
            weight,
            breaker,
        });
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub fn reliability(&self) -> &ReliabilityTracker {
        &self.reliability
    }

    /// Build the prompt for `market` and run one aggregation round.
    pub async fn decide(&self, market: &MarketData) -> EnsembleDecision {
        let request = build_signal_request(market, &self.optimizer);
        self.aggregate(request).await
    }

    pub async fn aggregate(&self, request: ProviderRequest) -> EnsembleDecision {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.aggregation_timeout_ms);
        let request = Arc::new(request);
        let fingerprint = request.fingerprint();

        let mut set = JoinSet::new();
        let mut task_owner: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut pending: HashSet<String> = HashSet::new();

        for slot in &self.providers {
            let provider = Arc::clone(&slot.provider);
            let breaker = Arc::clone(&slot.breaker);
            let retry = Arc::clone(&self.retry);
            let cache = self.cache.clone();
            let request = Arc::clone(&request);
            let key = cache_key(provider.id(), &fingerprint);
            let id = provider.id().to_string();

            let abort = set.spawn(async move {
                // An open breaker must not be answered from the cache.
                let cache = cache.filter(|_| breaker.state() != CircuitState::Open);
                let call = retry.execute(provider.id(), |_| {
                    let provider = Arc::clone(&provider);
                    let breaker = Arc::clone(&breaker);
                    let request = Arc::clone(&request);
                    async move { breaker.execute(provider.generate(&request)).await }
                });
                let result = match cache {
                    Some(cache) => cache.get_or_fetch(key, call).await,
                    None => call.await,
                };
                (provider.id().to_string(), result)
            });
            task_owner.insert(abort.id(), id.clone());
            pending.insert(id);
        }

        let mut results: HashMap<String, Result<ProviderSignal, ProviderError>> = HashMap::new();
        let mut excluded: Vec<ExcludedProvider> = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((id, result)))) => {
                    pending.remove(&id);
                    results.insert(id, result);
                }
                Ok(Some(Err(join_error))) => {
                    let id = task_owner
                        .get(&join_error.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string());
                    error!(provider = %id, error = %join_error, "Provider task panicked");
                    pending.remove(&id);
                    excluded.push(ExcludedProvider {
                        provider_id: id,
                        code: "panicked".to_string(),
                        reason: join_error.to_string(),
                    });
                }
                Ok(None) => break,
                Err(_) => {
                    set.abort_all();
                    break;
                }
            }
        }

        let mut weighted = Vec::new();
        for slot in &self.providers {
            let id = slot.provider.id();
            if pending.contains(id) {
                warn!(provider = %id, timeout_ms = self.config.aggregation_timeout_ms, "Provider missed aggregation deadline");
                excluded.push(ExcludedProvider {
                    provider_id: id.to_string(),
                    code: "deadline".to_string(),
                    reason: format!(
                        "no response within {} ms",
                        self.config.aggregation_timeout_ms
                    ),
                });
                continue;
            }
            match results.remove(id) {
                Some(Ok(signal)) => {
                    let weight = vote_weight(
                        slot.weight,
                        self.reliability.get(id),
                        signal.latency_ms,
                        self.config.latency_reference_ms,
                    );
                    weighted.push(WeightedSignal { signal, weight });
                }
                Some(Err(e)) => {
                    warn!(provider = %id, code = e.code(), error = %e, "Provider excluded from round");
                    excluded.push(ExcludedProvider {
                        provider_id: id.to_string(),
                        code: e.code().to_string(),
                        reason: e.to_string(),
                    });
                }
                None => {}
            }
        }

        let responders = weighted.len();
        let decision = build_consensus(weighted, excluded, self.config.min_providers);
        info!(
            symbol = %request.symbol,
            action = %decision.action,
            confidence = decision.confidence,
            consensus_ratio = decision.consensus_ratio,
            disagreement = decision.disagreement_index,
            responders,
            excluded = decision.excluded.len(),
            fallback = decision.fallback,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ensemble decision"
        );
        decision
    }

    pub fn provider_health(&self) -> BTreeMap<String, ProviderHealth> {
        self.providers
            .iter()
            .map(|slot| {
                let id = slot.provider.id().to_string();
                let health = ProviderHealth {
                    weight: slot.weight,
                    reliability: self.reliability.get(&id),
                    breaker: slot.breaker.metrics(),
                };
                (id, health)
            })
            .collect()
    }

    /// Returns false when no provider has that id.
    pub fn reset_circuit_breaker(&self, provider_id: &str) -> bool {
        match self.providers.iter().find(|s| s.provider.id() == provider_id) {
            Some(slot) => {
                slot.breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Emergency stop: every provider fails fast until its recovery timeout
    /// and no cached signal outlives the stop.
    pub fn force_open_all(&self) {
        for slot in &self.providers {
            slot.breaker.force_open();
        }
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    pub fn record_outcome(&self, decision: &EnsembleDecision, realized: Action) {
        self.reliability.record_decision_outcome(decision, realized);
    }
}
