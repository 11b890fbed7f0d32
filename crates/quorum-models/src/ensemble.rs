use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::signal::{Action, ProviderSignal};

/// Summed vote weight per action for one aggregation round.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionTally {
    pub buy: f64,
    pub sell: f64,
    pub hold: f64,
}

impl ActionTally {
    pub fn add(&mut self, action: Action, weight: f64) {
        match action {
            Action::Buy => self.buy += weight,
            Action::Sell => self.sell += weight,
            Action::Hold => self.hold += weight,
        }
    }

    pub fn get(&self, action: Action) -> f64 {
        match action {
            Action::Buy => self.buy,
            Action::Sell => self.sell,
            Action::Hold => self.hold,
        }
    }

    pub fn total(&self) -> f64 {
        self.buy + self.sell + self.hold
    }
}

/// A provider that did not contribute a vote this round, and why.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcludedProvider {
    pub provider_id: String,
    /// Short machine-readable cause (`circuit_open`, `timeout`, `retry_exhausted`, ...).
    pub code: String,
    pub reason: String,
}

/// The consensus of one decision cycle. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleDecision {
    pub action: Action,
    /// Vote-weighted mean confidence of the signals agreeing with `action`.
    pub confidence: f64,
    /// Fraction of contributing signals agreeing with `action`.
    pub consensus_ratio: f64,
    /// 0.0 when every contributor agreed, rising with confident dissent.
    pub disagreement_index: f64,
    pub contributing_signals: Vec<ProviderSignal>,
    pub reasoning: String,
    pub tally: ActionTally,
    pub excluded: Vec<ExcludedProvider>,
    /// True when fewer than the quorum responded and a single provider decided.
    pub fallback: bool,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub decided_at: DateTime<Utc>,
}

impl EnsembleDecision {
    /// The decision produced when nothing usable came back.
    pub fn no_signal(reasoning: impl Into<String>, excluded: Vec<ExcludedProvider>) -> Self {
        Self {
            action: Action::Hold,
            confidence: 0.0,
            consensus_ratio: 0.0,
            disagreement_index: 0.0,
            contributing_signals: Vec::new(),
            reasoning: reasoning.into(),
            tally: ActionTally::default(),
            excluded,
            fallback: true,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            decided_at: Utc::now(),
        }
    }
}
