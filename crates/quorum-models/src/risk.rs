use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::market::VolatilityRegime;

/// Process-wide risk configuration owned by the risk engine.
///
/// Only changed through explicit updates, never implicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskParameters {
    /// Hard ceiling for a single position in USD.
    pub max_position_size_usd: Decimal,
    /// Smallest tradable size; anything below is vetoed.
    pub min_position_size_usd: Decimal,
    /// Percent of portfolio value that may be lost on one trade at its stop.
    pub risk_per_trade_pct: f64,
    /// Stop distance (percent) assumed when the ensemble proposes none.
    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: f64,
    /// Percent loss over the trailing 24h that halts trading.
    pub max_daily_loss_pct: f64,
    /// Drawdown fraction (0.15 = 15%) at which trading stops.
    pub max_drawdown_threshold: f64,
    /// Drawdown fraction at which an emergency exit is recommended.
    #[serde(default = "default_emergency_stop")]
    pub emergency_stop_threshold: f64,
    /// Weighted correlation above which new exposure is shrunk.
    pub correlation_threshold: f64,
    /// Largest share of portfolio value allowed in one sector.
    #[serde(default = "default_sector_exposure")]
    pub max_sector_exposure: f64,
    /// Largest share of portfolio value allowed in the two biggest sectors.
    #[serde(default = "default_top_two_exposure")]
    pub max_top_two_sector_exposure: f64,
    pub volatility_adjustment: bool,
    #[serde(default = "default_open_hour")]
    pub market_open_hour_utc: u32,
    #[serde(default = "default_close_hour")]
    pub market_close_hour_utc: u32,
}

fn default_stop_loss_pct() -> f64 {
    2.0
}
fn default_emergency_stop() -> f64 {
    0.25
}
fn default_sector_exposure() -> f64 {
    0.40
}
fn default_top_two_exposure() -> f64 {
    0.60
}
fn default_open_hour() -> u32 {
    13
}
fn default_close_hour() -> u32 {
    20
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_position_size_usd: Decimal::new(10_000, 0),
            min_position_size_usd: Decimal::new(10, 0),
            risk_per_trade_pct: 2.0,
            default_stop_loss_pct: default_stop_loss_pct(),
            max_daily_loss_pct: 5.0,
            max_drawdown_threshold: 0.15,
            emergency_stop_threshold: default_emergency_stop(),
            correlation_threshold: 0.7,
            max_sector_exposure: default_sector_exposure(),
            max_top_two_sector_exposure: default_top_two_exposure(),
            volatility_adjustment: true,
            market_open_hour_utc: default_open_hour(),
            market_close_hour_utc: default_close_hour(),
        }
    }
}

impl RiskParameters {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fail = |msg: String| Err(ValidationError::RiskParameters(msg));

        if self.max_position_size_usd <= Decimal::ZERO {
            return fail("max_position_size_usd must be positive".to_string());
        }
        if self.min_position_size_usd < Decimal::ZERO
            || self.min_position_size_usd > self.max_position_size_usd
        {
            return fail(format!(
                "min_position_size_usd {} must be within [0, {}]",
                self.min_position_size_usd, self.max_position_size_usd
            ));
        }
        if !(self.risk_per_trade_pct > 0.0 && self.risk_per_trade_pct <= 100.0) {
            return fail(format!("risk_per_trade_pct {} out of (0, 100]", self.risk_per_trade_pct));
        }
        if !(self.default_stop_loss_pct > 0.0 && self.default_stop_loss_pct < 100.0) {
            return fail(format!(
                "default_stop_loss_pct {} out of (0, 100)",
                self.default_stop_loss_pct
            ));
        }
        if !(self.max_daily_loss_pct > 0.0 && self.max_daily_loss_pct <= 100.0) {
            return fail(format!("max_daily_loss_pct {} out of (0, 100]", self.max_daily_loss_pct));
        }
        if !(self.max_drawdown_threshold > 0.0 && self.max_drawdown_threshold < 1.0) {
            return fail(format!(
                "max_drawdown_threshold {} out of (0, 1)",
                self.max_drawdown_threshold
            ));
        }
        if !(self.emergency_stop_threshold >= self.max_drawdown_threshold
            && self.emergency_stop_threshold <= 1.0)
        {
            return fail(format!(
                "emergency_stop_threshold {} must be within [max_drawdown_threshold, 1]",
                self.emergency_stop_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return fail(format!(
                "correlation_threshold {} out of [0, 1]",
                self.correlation_threshold
            ));
        }
        if !(self.max_sector_exposure > 0.0 && self.max_sector_exposure <= 1.0) {
            return fail(format!("max_sector_exposure {} out of (0, 1]", self.max_sector_exposure));
        }
        if !(self.max_top_two_sector_exposure >= self.max_sector_exposure
            && self.max_top_two_sector_exposure <= 1.0)
        {
            return fail(format!(
                "max_top_two_sector_exposure {} must be within [max_sector_exposure, 1]",
                self.max_top_two_sector_exposure
            ));
        }
        if self.market_open_hour_utc > 23 || self.market_close_hour_utc > 23 {
            return fail("market hours must be within 0..=23".to_string());
        }
        Ok(())
    }
}

/// Partial update for [`RiskParameters`]; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskParametersUpdate {
    pub max_position_size_usd: Option<Decimal>,
    pub min_position_size_usd: Option<Decimal>,
    pub risk_per_trade_pct: Option<f64>,
    pub default_stop_loss_pct: Option<f64>,
    pub max_daily_loss_pct: Option<f64>,
    pub max_drawdown_threshold: Option<f64>,
    pub emergency_stop_threshold: Option<f64>,
    pub correlation_threshold: Option<f64>,
    pub max_sector_exposure: Option<f64>,
    pub max_top_two_sector_exposure: Option<f64>,
    pub volatility_adjustment: Option<bool>,
    pub market_open_hour_utc: Option<u32>,
    pub market_close_hour_utc: Option<u32>,
}

impl RiskParametersUpdate {
    /// Apply onto a copy of `base` and validate the result.
    pub fn apply(&self, base: &RiskParameters) -> Result<RiskParameters, ValidationError> {
        let mut next = base.clone();
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { next.$field = value; })*
            };
        }
        merge!(
            max_position_size_usd,
            min_position_size_usd,
            risk_per_trade_pct,
            default_stop_loss_pct,
            max_daily_loss_pct,
            max_drawdown_threshold,
            emergency_stop_threshold,
            correlation_threshold,
            max_sector_exposure,
            max_top_two_sector_exposure,
            volatility_adjustment,
            market_open_hour_utc,
            market_close_hour_utc,
        );
        next.validate()?;
        Ok(next)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrawdownAction {
    None,
    ReducePositions,
    StopTrading,
    EmergencyExit,
}

/// Drawdown view derived from a portfolio snapshot on every call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DrawdownState {
    /// Peak-to-current decline as a fraction.
    pub current_drawdown: f64,
    pub peak_value: Decimal,
    /// `current_drawdown / max_drawdown_threshold`.
    pub drawdown_ratio: f64,
    pub protection_active: bool,
    pub recommended_action: DrawdownAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a cumulative size multiplier to a level; smaller multipliers mean
    /// the engine saw more risk.
    pub fn from_multiplier(multiplier: f64) -> Self {
        if multiplier >= 0.8 {
            RiskLevel::Low
        } else if multiplier >= 0.5 {
            RiskLevel::Medium
        } else if multiplier >= 0.25 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VetoKind {
    EmergencyExit,
    StopTrading,
    DailyLossLimit,
    SectorConcentration,
    BelowMinimumSize,
}

/// A risk engine refusal. Not an error: the decision becomes a HOLD.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskVeto {
    pub kind: VetoKind,
    pub reason: String,
}

/// One stage's effect on the running size multiplier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAdjustment {
    pub stage: String,
    pub multiplier: f64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskAssessment {
    pub base_size_usd: Decimal,
    pub adjusted_size_usd: Decimal,
    pub cumulative_multiplier: f64,
    pub risk_level: RiskLevel,
    pub veto: Option<RiskVeto>,
    pub drawdown: DrawdownState,
    pub volatility_regime: VolatilityRegime,
    pub adjustments: Vec<RiskAdjustment>,
    /// One-day 95% VaR of the proposed position, when history allows.
    pub value_at_risk_usd: Option<Decimal>,
}
