use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ensemble::EnsembleDecision;
use crate::risk::RiskAssessment;
use crate::signal::Action;

pub const OUTPUT_SCHEMA_VERSION: u32 = 1;

/// The final, executable output of one decision cycle for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingDecision {
    pub id: Uuid,
    pub schema_version: u32,
    pub symbol: String,
    /// Final action after the risk gate. A vetoed BUY/SELL becomes HOLD.
    pub action: Action,
    pub size_usd: Decimal,
    pub entry_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub confidence: f64,
    /// Whether downstream execution should act on this decision.
    pub should_execute: bool,
    pub ensemble_decision: EnsembleDecision,
    /// Absent when the cycle failed before the risk engine ran.
    pub risk_assessment: Option<RiskAssessment>,
    pub veto_reason: Option<String>,
    pub reasoning: String,
    pub decided_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

impl TradingDecision {
    /// A non-executable HOLD carrying `reasoning`, used whenever a cycle
    /// cannot produce a real decision.
    pub fn safe_hold(
        symbol: &str,
        reasoning: impl Into<String>,
        ensemble_decision: EnsembleDecision,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schema_version: OUTPUT_SCHEMA_VERSION,
            symbol: symbol.to_string(),
            action: Action::Hold,
            size_usd: Decimal::ZERO,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            confidence: 0.0,
            should_execute: false,
            ensemble_decision,
            risk_assessment: None,
            veto_reason: None,
            reasoning: reasoning.into(),
            decided_at: Utc::now(),
            processing_time_ms: 0,
        }
    }
}
