//! Dynamic risk engine: turns an ensemble decision into a position size.
//!
//! Stages run in a fixed order, each either scaling a running multiplier or
//! vetoing:
//!
//! 1. drawdown and daily-loss gates
//! 2. volatility regime
//! 3. market regime and liquidity
//! 4. session and sentiment
//! 5. correlation and sector concentration (BUY only)
//! 6. clamp to the base size, `max_position_size_usd` and the per-trade risk cap
//!
//! The result never exceeds the base size. A size that would fall below
//! `min_position_size_usd` is vetoed rather than raised.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use quorum_models::{
    Action, DrawdownState, EnsembleDecision, MarketCondition, MarketVolatility,
    PortfolioSnapshot, RiskAdjustment, RiskAssessment, RiskLevel, RiskParameters,
    RiskParametersUpdate, RiskVeto, VetoKind,
};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::adjustments::{
    market_condition_multiplier, sentiment_multiplier, session_multiplier, volatility_multiplier,
};
use crate::correlation::{
    max_sector_size, sector_exposures, weighted_correlation, CorrelationModel, UNCLASSIFIED,
};
use crate::drawdown::{compute_drawdown_state, daily_loss_pct, drawdown_multiplier};
use crate::error::RiskError;
use crate::var::{position_var, simple_returns};

const VAR_CONFIDENCE: f64 = 0.95;

/// Everything the engine needs for one assessment.
#[derive(Debug, Clone, Copy)]
pub struct RiskInput<'a> {
    pub symbol: &'a str,
    pub decision: &'a EnsembleDecision,
    /// Current market price, used when the ensemble proposes no entry.
    pub price: Decimal,
    pub portfolio: &'a PortfolioSnapshot,
    pub volatility: MarketVolatility,
    pub condition: MarketCondition,
    pub as_of: DateTime<Utc>,
}

pub struct DynamicRiskEngine {
    params: RwLock<RiskParameters>,
    correlation: Arc<dyn CorrelationModel>,
}

impl DynamicRiskEngine {
    pub fn new(
        params: RiskParameters,
        correlation: Arc<dyn CorrelationModel>,
    ) -> Result<Self, RiskError> {
        params.validate()?;
        Ok(Self {
            params: RwLock::new(params),
            correlation,
        })
    }

    pub fn parameters(&self) -> RiskParameters {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `update` into the current parameters. Invalid results are
    /// rejected and leave the parameters untouched.
    pub fn update_parameters(
        &self,
        update: &RiskParametersUpdate,
    ) -> Result<RiskParameters, RiskError> {
        let mut params = self.params.write().unwrap_or_else(PoisonError::into_inner);
        let next = update.apply(&params)?;
        *params = next.clone();
        info!(?update, "Risk parameters updated");
        Ok(next)
    }

    pub fn correlation_model(&self) -> &Arc<dyn CorrelationModel> {
        &self.correlation
    }

    pub fn assess(&self, input: &RiskInput<'_>) -> RiskAssessment {
        let params = self.parameters();
        let mut run = Assessment::new(input, &params);

        if input.decision.action == Action::Hold {
            return run.finish_hold();
        }

        // Stage 1
        let drawdown = run.drawdown.clone();
        if drawdown.current_drawdown >= params.emergency_stop_threshold {
            return run.veto(
                VetoKind::EmergencyExit,
                format!(
                    "Drawdown {:.2}% reached emergency stop {:.2}%",
                    drawdown.current_drawdown * 100.0,
                    params.emergency_stop_threshold * 100.0
                ),
            );
        }
        if drawdown.current_drawdown >= params.max_drawdown_threshold {
            return run.veto(
                VetoKind::StopTrading,
                format!(
                    "Drawdown {:.2}% reached limit {:.2}%",
                    drawdown.current_drawdown * 100.0,
                    params.max_drawdown_threshold * 100.0
                ),
            );
        }
        if let Some(loss) = daily_loss_pct(input.portfolio, input.as_of) {
            if loss >= params.max_daily_loss_pct {
                return run.veto(
                    VetoKind::DailyLossLimit,
                    format!(
                        "Lost {loss:.2}% in 24h, limit {:.2}%",
                        params.max_daily_loss_pct
                    ),
                );
            }
        }
        run.scale(
            "drawdown",
            drawdown_multiplier(drawdown.drawdown_ratio),
            format!("drawdown ratio {:.2}", drawdown.drawdown_ratio),
        );

        // Stage 2
        if params.volatility_adjustment {
            run.scale(
                "volatility",
                volatility_multiplier(input.volatility.regime),
                format!(
                    "{:?} regime, daily volatility {:.2}%",
                    input.volatility.regime,
                    input.volatility.daily_volatility * 100.0
                ),
            );
        }

        // Stage 3 and 4
        let condition = input.condition;
        run.scale(
            "market_condition",
            market_condition_multiplier(&condition),
            format!("{:?} regime, {:?} liquidity", condition.regime, condition.liquidity),
        );
        run.scale(
            "session",
            session_multiplier(condition.session),
            format!("{:?} session", condition.session),
        );
        run.scale(
            "sentiment",
            sentiment_multiplier(&condition),
            format!("{:?} sentiment", condition.sentiment),
        );

        let mut size = scale_decimal(run.base, run.multiplier);

        // Stage 5
        if input.decision.action == Action::Buy {
            let positions = &input.portfolio.open_positions;
            let correlation = weighted_correlation(self.correlation.as_ref(), input.symbol, positions);
            let threshold = params.correlation_threshold;
            if correlation > threshold && threshold < 1.0 {
                let factor = 1.0 - 0.5 * (correlation - threshold) / (1.0 - threshold);
                run.scale(
                    "correlation",
                    factor,
                    format!("weighted correlation {correlation:.2} above {threshold:.2}"),
                );
                size = scale_decimal(size, factor);
            }

            // Unknown symbols share the bucket their open positions are counted in.
            let sector = self
                .correlation
                .sector(input.symbol)
                .unwrap_or_else(|| UNCLASSIFIED.to_string());
            let exposures = sector_exposures(self.correlation.as_ref(), positions);
            let cap = max_sector_size(
                input.portfolio.total_value,
                &exposures,
                &sector,
                params.max_sector_exposure,
                params.max_top_two_sector_exposure,
            );
            if size > cap {
                if cap < params.min_position_size_usd {
                    return run.veto(
                        VetoKind::SectorConcentration,
                        format!(
                            "Sector {sector} has room for ${} at most, below minimum ${}",
                            cap.round_dp(2),
                            params.min_position_size_usd
                        ),
                    );
                }
                run.note(
                    "sector",
                    ratio(cap, size),
                    format!("capped to ${} by {sector} concentration", cap.round_dp(2)),
                );
                size = cap;
            }
        }

        // Stage 6
        let stop_distance = stop_distance(input, &params);
        let risk_cap = input.portfolio.total_value
            * Decimal::from_f64(params.risk_per_trade_pct / 100.0 / stop_distance)
                .unwrap_or(Decimal::ZERO);
        for (stage, cap, note) in [
            ("base", run.base, "base size".to_string()),
            (
                "max_position",
                params.max_position_size_usd,
                format!("max position ${}", params.max_position_size_usd),
            ),
            (
                "risk_per_trade",
                risk_cap,
                format!(
                    "{:.2}% risk at {:.2}% stop distance",
                    params.risk_per_trade_pct,
                    stop_distance * 100.0
                ),
            ),
        ] {
            if size > cap {
                if stage != "base" {
                    run.note(stage, ratio(cap, size), note);
                }
                size = cap;
            }
        }
        let size = size.max(Decimal::ZERO).round_dp(2);

        if size < params.min_position_size_usd {
            return run.veto(
                VetoKind::BelowMinimumSize,
                format!(
                    "Adjusted size ${size} below minimum ${}",
                    params.min_position_size_usd
                ),
            );
        }

        run.finish(size)
    }
}

/// Fractional distance from entry to stop.
fn stop_distance(input: &RiskInput<'_>, params: &RiskParameters) -> f64 {
    let entry = input.decision.entry_price.unwrap_or(input.price);
    let proposed = input.decision.stop_loss.and_then(|stop| {
        if entry <= Decimal::ZERO {
            return None;
        }
        ((entry - stop).abs() / entry).to_f64()
    });
    match proposed {
        Some(distance) if distance > 0.0 && distance < 1.0 => distance,
        _ => params.default_stop_loss_pct / 100.0,
    }
}

fn scale_decimal(value: Decimal, factor: f64) -> Decimal {
    Decimal::from_f64(factor)
        .map(|f| value * f)
        .unwrap_or(Decimal::ZERO)
}

fn ratio(numerator: Decimal, denominator: Decimal) -> f64 {
    if denominator.is_zero() {
        return 0.0;
    }
    (numerator / denominator).to_f64().unwrap_or(0.0)
}

/// Running state of one assessment.
struct Assessment<'a> {
    input: &'a RiskInput<'a>,
    base: Decimal,
    multiplier: f64,
    drawdown: DrawdownState,
    adjustments: Vec<RiskAdjustment>,
}

impl<'a> Assessment<'a> {
    fn new(input: &'a RiskInput<'a>, params: &RiskParameters) -> Self {
        let decision = input.decision;
        let factor = decision.confidence.clamp(0.0, 1.0)
            * (1.0 - decision.disagreement_index.clamp(0.0, 1.0) / 2.0);
        Self {
            input,
            base: scale_decimal(params.max_position_size_usd, factor).round_dp(2),
            multiplier: 1.0,
            drawdown: compute_drawdown_state(input.portfolio, params),
            adjustments: Vec::new(),
        }
    }

    /// Apply a stage multiplier; neutral stages leave no trace.
    fn scale(&mut self, stage: &str, multiplier: f64, note: String) {
        if (multiplier - 1.0).abs() < f64::EPSILON {
            return;
        }
        self.multiplier *= multiplier;
        self.note(stage, multiplier, note);
    }

    fn note(&mut self, stage: &str, multiplier: f64, note: String) {
        self.adjustments.push(RiskAdjustment {
            stage: stage.to_string(),
            multiplier,
            note,
        });
    }

    fn value_at_risk(&self, size: Decimal) -> Option<Decimal> {
        let returns = simple_returns(&self.input.portfolio.value_series());
        position_var(size, &returns, VAR_CONFIDENCE)
    }

    fn build(
        self,
        adjusted: Decimal,
        risk_level: RiskLevel,
        veto: Option<RiskVeto>,
    ) -> RiskAssessment {
        let value_at_risk_usd = if adjusted > Decimal::ZERO {
            self.value_at_risk(adjusted)
        } else {
            None
        };
        RiskAssessment {
            base_size_usd: self.base,
            adjusted_size_usd: adjusted,
            cumulative_multiplier: self.multiplier,
            risk_level,
            veto,
            drawdown: self.drawdown,
            volatility_regime: self.input.volatility.regime,
            adjustments: self.adjustments,
            value_at_risk_usd,
        }
    }

    fn veto(self, kind: VetoKind, reason: String) -> RiskAssessment {
        warn!(symbol = self.input.symbol, ?kind, reason = %reason, "Risk veto");
        self.build(
            Decimal::ZERO,
            RiskLevel::Critical,
            Some(RiskVeto { kind, reason }),
        )
    }

    fn finish_hold(self) -> RiskAssessment {
        let level = if self.drawdown.protection_active {
            RiskLevel::High
        } else {
            RiskLevel::Low
        };
        self.build(Decimal::ZERO, level, None)
    }

    fn finish(self, size: Decimal) -> RiskAssessment {
        let level = RiskLevel::from_multiplier(self.multiplier.min(ratio(size, self.base).max(0.0)));
        debug!(
            symbol = self.input.symbol,
            base = %self.base,
            size = %size,
            multiplier = self.multiplier,
            ?level,
            "Risk assessment"
        );
        self.build(size, level, None)
    }
}
