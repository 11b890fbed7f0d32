//! Historical Value-at-Risk.
//!
//! Returns are simple period returns; VaR and CVaR are reported as positive
//! loss fractions (0.03 means a 3% loss).

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Returns needed before a VaR figure is attached to an assessment.
pub const MIN_VAR_OBSERVATIONS: usize = 20;

pub fn simple_returns(values: &[Decimal]) -> Vec<f64> {
    values
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].to_f64()?;
            let next = w[1].to_f64()?;
            (prev > 0.0).then(|| next / prev - 1.0)
        })
        .collect()
}

fn sorted(returns: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

/// `(1 - confidence) × n`, snapped to the nearest integer when within float noise.
fn tail_count(confidence: f64, n: usize) -> f64 {
    let raw = (1.0 - confidence) * n as f64;
    if (raw - raw.round()).abs() < 1e-9 {
        raw.round()
    } else {
        raw
    }
}

/// Loss not exceeded with probability `confidence` (e.g. 0.95).
pub fn historical_var(returns: &[f64], confidence: f64) -> Option<f64> {
    let sorted = sorted(returns);
    if sorted.is_empty() {
        return None;
    }
    let index = (tail_count(confidence, sorted.len()).floor() as usize).min(sorted.len() - 1);
    Some((-sorted[index]).max(0.0))
}

/// Mean loss over the worst `1 - confidence` share of returns (at least one).
pub fn conditional_var(returns: &[f64], confidence: f64) -> Option<f64> {
    let sorted = sorted(returns);
    if sorted.is_empty() {
        return None;
    }
    let cutoff = (tail_count(confidence, sorted.len()).ceil() as usize).clamp(1, sorted.len());
    let tail = &sorted[..cutoff];
    let mean = tail.iter().sum::<f64>() / tail.len() as f64;
    Some((-mean).max(0.0))
}

/// One-period VaR of a position in USD, or `None` with too little history.
pub fn position_var(size_usd: Decimal, returns: &[f64], confidence: f64) -> Option<Decimal> {
    if returns.len() < MIN_VAR_OBSERVATIONS {
        return None;
    }
    let loss = historical_var(returns, confidence)?;
    Decimal::from_f64(loss).map(|loss| (size_usd * loss).round_dp(2))
}
