use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The three actions a provider or the ensemble can recommend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub const ALL: [Action; 3] = [Action::Buy, Action::Sell, Action::Hold];

    /// Parse the loose vocabulary providers actually reply with.
    ///
    /// Accepts `buy`/`long`, `sell`/`short` and `hold`/`neutral`/`wait`,
    /// case-insensitively and ignoring surrounding whitespace.
    pub fn parse_loose(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" | "strong_buy" | "strong buy" => Some(Action::Buy),
            "sell" | "short" | "strong_sell" | "strong sell" => Some(Action::Sell),
            "hold" | "neutral" | "wait" | "none" => Some(Action::Hold),
            _ => None,
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Action::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// A normalized reply from one signal provider.
///
/// Produced once per successful provider call and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderSignal {
    pub provider_id: String,
    pub action: Action,
    /// 0.0 to 1.0, clamped by the adapter that produced it.
    pub confidence: f64,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reasoning: String,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}
