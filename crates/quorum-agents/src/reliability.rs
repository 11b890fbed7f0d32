use std::collections::BTreeMap;

use dashmap::DashMap;
use quorum_models::{Action, EnsembleDecision};
use tracing::debug;

/// Reliability of a provider nobody has graded yet.
pub const INITIAL_RELIABILITY: f64 = 1.0;

/// Per-provider exponentially weighted success rate, fed by outcome feedback.
///
/// Each provider's entry is written only through `record`, one key at a time.
#[derive(Debug)]
pub struct ReliabilityTracker {
    alpha: f64,
    scores: DashMap<String, f64>,
}

impl ReliabilityTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            scores: DashMap::new(),
        }
    }

    pub fn get(&self, provider: &str) -> f64 {
        self.scores
            .get(provider)
            .map(|score| *score)
            .unwrap_or(INITIAL_RELIABILITY)
    }

    pub fn record(&self, provider: &str, correct: bool) -> f64 {
        let outcome = if correct { 1.0 } else { 0.0 };
        let mut entry = self
            .scores
            .entry(provider.to_string())
            .or_insert(INITIAL_RELIABILITY);
        *entry = self.alpha * outcome + (1.0 - self.alpha) * *entry;
        debug!(provider, correct, reliability = *entry, "Reliability updated");
        *entry
    }

    /// Grade every contributor of a resolved decision against what the market did.
    pub fn record_decision_outcome(&self, decision: &EnsembleDecision, realized: Action) {
        for signal in &decision.contributing_signals {
            self.record(&signal.provider_id, signal.action == realized);
        }
    }

    /// Administrative only; reliability is never reset implicitly.
    pub fn reset(&self, provider: &str) {
        self.scores.remove(provider);
    }

    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.scores
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}
