//! Drawdown and daily-loss readings derived from a portfolio snapshot.

use chrono::{DateTime, Duration, Utc};
use quorum_models::{DrawdownAction, DrawdownState, PortfolioSnapshot, RiskParameters};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Drawdown ratio at which protection switches on.
pub const PROTECTION_RATIO: f64 = 0.8;

/// Size multiplier for a drawdown ratio (`current_drawdown / max_drawdown_threshold`).
///
/// | ratio  | multiplier |
/// |--------|------------|
/// | ≥ 1.0  | 0.1        |
/// | ≥ 0.8  | 0.3        |
/// | ≥ 0.6  | 0.6        |
/// | ≥ 0.4  | 0.8        |
/// | < 0.4  | 1.0        |
pub fn drawdown_multiplier(ratio: f64) -> f64 {
    if ratio >= 1.0 {
        0.1
    } else if ratio >= PROTECTION_RATIO {
        0.3
    } else if ratio >= 0.6 {
        0.6
    } else if ratio >= 0.4 {
        0.8
    } else {
        1.0
    }
}

/// Peak-to-current decline over the snapshot's value history.
pub fn compute_drawdown_state(
    snapshot: &PortfolioSnapshot,
    params: &RiskParameters,
) -> DrawdownState {
    let values = snapshot.value_series();
    let peak = values.iter().copied().max().unwrap_or(snapshot.total_value);

    let current_drawdown = if peak > Decimal::ZERO {
        ((peak - snapshot.total_value) / peak)
            .to_f64()
            .unwrap_or(0.0)
            .max(0.0)
    } else {
        0.0
    };
    let drawdown_ratio = current_drawdown / params.max_drawdown_threshold;

    let recommended_action = if current_drawdown >= params.emergency_stop_threshold {
        DrawdownAction::EmergencyExit
    } else if current_drawdown >= params.max_drawdown_threshold {
        DrawdownAction::StopTrading
    } else if drawdown_ratio >= PROTECTION_RATIO {
        DrawdownAction::ReducePositions
    } else {
        DrawdownAction::None
    };

    DrawdownState {
        current_drawdown,
        peak_value: peak,
        drawdown_ratio,
        protection_active: recommended_action != DrawdownAction::None,
        recommended_action,
    }
}

/// Percent lost since 24h before `as_of`.
///
/// The reference is the latest point at least a day old; when the history is
/// shorter than a day, its oldest point. Gains come back negative.
pub fn daily_loss_pct(snapshot: &PortfolioSnapshot, as_of: DateTime<Utc>) -> Option<f64> {
    let cutoff = as_of - Duration::hours(24);
    let reference = snapshot
        .historical_values
        .iter()
        .rev()
        .find(|point| point.timestamp <= cutoff)
        .or_else(|| snapshot.historical_values.first())?;
    if reference.value <= Decimal::ZERO {
        return None;
    }
    let loss = (reference.value - snapshot.total_value) / reference.value;
    loss.to_f64().map(|fraction| fraction * 100.0)
}
