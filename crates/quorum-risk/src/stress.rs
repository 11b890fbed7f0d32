//! Monte-Carlo stress testing by bootstrap resampling of portfolio returns.
//!
//! Each path draws `horizon_days` returns with replacement from the observed
//! history, optionally scaling their deviation from the mean by
//! `volatility_shock`, and compounds them from the current portfolio value.

use quorum_models::PortfolioSnapshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RiskError;
use crate::var::{conditional_var, historical_var, simple_returns};

/// Observed returns required before resampling means anything.
pub const MIN_STRESS_RETURNS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressConfig {
    /// Number of simulated paths (default 1000).
    pub paths: usize,
    /// Periods per path (default 30).
    pub horizon_days: usize,
    /// RNG seed for reproducibility.
    pub seed: u64,
    /// Multiplier on each return's deviation from the mean. 1.0 replays history.
    pub volatility_shock: f64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            paths: 1_000,
            horizon_days: 30,
            seed: 42,
            volatility_shock: 1.0,
        }
    }
}

impl StressConfig {
    fn validate(&self) -> Result<(), RiskError> {
        if self.paths == 0 || self.horizon_days == 0 {
            return Err(RiskError::InvalidStressConfig(
                "paths and horizon_days must be positive".to_string(),
            ));
        }
        if !(self.volatility_shock.is_finite() && self.volatility_shock > 0.0) {
            return Err(RiskError::InvalidStressConfig(format!(
                "volatility_shock {} must be positive",
                self.volatility_shock
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressTestResult {
    pub paths: usize,
    pub horizon_days: usize,
    /// Observed returns the paths were drawn from.
    pub sample_returns: usize,
    pub initial_value: Decimal,
    pub median_terminal_value: Decimal,
    /// 5th percentile terminal value (pessimistic outcome).
    pub p5_terminal_value: Decimal,
    pub expected_max_drawdown: f64,
    pub p95_max_drawdown: f64,
    /// Share of paths whose drawdown reached `breach_threshold`.
    pub breach_probability: f64,
    pub breach_threshold: f64,
    /// 95% VaR of the horizon return, as a loss fraction.
    pub horizon_var_95: f64,
    pub horizon_cvar_95: f64,
}

/// Stress the snapshot's value history against `max_drawdown_threshold`.
pub fn run_stress_test(
    snapshot: &PortfolioSnapshot,
    config: &StressConfig,
    max_drawdown_threshold: f64,
) -> Result<StressTestResult, RiskError> {
    let returns = simple_returns(&snapshot.value_series());
    simulate(&returns, snapshot.total_value, config, max_drawdown_threshold)
}

pub fn simulate(
    returns: &[f64],
    initial_value: Decimal,
    config: &StressConfig,
    max_drawdown_threshold: f64,
) -> Result<StressTestResult, RiskError> {
    config.validate()?;
    if returns.len() < MIN_STRESS_RETURNS {
        return Err(RiskError::InsufficientHistory {
            required: MIN_STRESS_RETURNS,
            actual: returns.len(),
        });
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut terminals = Vec::with_capacity(config.paths);
    let mut drawdowns = Vec::with_capacity(config.paths);

    for _ in 0..config.paths {
        let mut value = 1.0_f64;
        let mut peak = 1.0_f64;
        let mut max_drawdown = 0.0_f64;
        for _ in 0..config.horizon_days {
            let sampled = returns[rng.gen_range(0..returns.len())];
            let shocked = mean + (sampled - mean) * config.volatility_shock;
            value *= (1.0 + shocked).max(0.0);
            peak = peak.max(value);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - value) / peak);
            }
        }
        terminals.push(value);
        drawdowns.push(max_drawdown);
    }

    let horizon_returns: Vec<f64> = terminals.iter().map(|v| v - 1.0).collect();
    sort(&mut terminals);
    sort(&mut drawdowns);

    let breaches = drawdowns.iter().filter(|d| **d >= max_drawdown_threshold).count();
    let scale = |relative: f64| {
        Decimal::from_f64(relative)
            .map(|r| (initial_value * r).round_dp(2))
            .unwrap_or(Decimal::ZERO)
    };

    let result = StressTestResult {
        paths: config.paths,
        horizon_days: config.horizon_days,
        sample_returns: returns.len(),
        initial_value,
        median_terminal_value: scale(percentile(&terminals, 0.5)),
        p5_terminal_value: scale(percentile(&terminals, 0.05)),
        expected_max_drawdown: drawdowns.iter().sum::<f64>() / drawdowns.len() as f64,
        p95_max_drawdown: percentile(&drawdowns, 0.95),
        breach_probability: breaches as f64 / config.paths as f64,
        breach_threshold: max_drawdown_threshold,
        horizon_var_95: historical_var(&horizon_returns, 0.95).unwrap_or(0.0),
        horizon_cvar_95: conditional_var(&horizon_returns, 0.95).unwrap_or(0.0),
    };

    info!(
        paths = result.paths,
        horizon_days = result.horizon_days,
        breach_probability = result.breach_probability,
        p95_max_drawdown = result.p95_max_drawdown,
        "Stress test complete"
    );
    Ok(result)
}

fn sort(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

/// Nearest-rank percentile of sorted values.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}
