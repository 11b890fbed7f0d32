//! Correlation strategies and sector concentration limits.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use quorum_models::Position;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Sector bucket for positions nobody could classify.
pub const UNCLASSIFIED: &str = "unclassified";

const SAME_SYMBOL: f64 = 1.0;
const SAME_SECTOR: f64 = 0.7;
const CROSS_SECTOR: f64 = 0.2;

/// Overlapping observations needed before a return-based correlation is trusted.
pub const MIN_OVERLAP: usize = 20;

/// Pluggable view of how symbols move together.
pub trait CorrelationModel: Send + Sync {
    /// Correlation in `[-1, 1]` between two symbols.
    fn correlation(&self, a: &str, b: &str) -> f64;

    fn sector(&self, symbol: &str) -> Option<String>;
}

/// Deterministic sector lookup: same symbol 1.0, same sector 0.7, else 0.2.
#[derive(Debug, Clone, Default)]
pub struct SectorCorrelationModel {
    sectors: HashMap<String, String>,
}

impl SectorCorrelationModel {
    pub fn new(sectors: HashMap<String, String>) -> Self {
        Self { sectors }
    }

    /// A small table of widely traded symbols.
    pub fn with_defaults() -> Self {
        let table: &[(&str, &str)] = &[
            ("AAPL", "technology"),
            ("MSFT", "technology"),
            ("NVDA", "technology"),
            ("GOOGL", "technology"),
            ("META", "technology"),
            ("AMZN", "consumer"),
            ("TSLA", "consumer"),
            ("WMT", "consumer"),
            ("JPM", "financials"),
            ("BAC", "financials"),
            ("GS", "financials"),
            ("XOM", "energy"),
            ("CVX", "energy"),
            ("JNJ", "healthcare"),
            ("PFE", "healthcare"),
            ("UNH", "healthcare"),
            ("BTC-USD", "crypto"),
            ("ETH-USD", "crypto"),
            ("SOL-USD", "crypto"),
        ];
        Self::new(
            table
                .iter()
                .map(|(symbol, sector)| (symbol.to_string(), sector.to_string()))
                .collect(),
        )
    }

    pub fn insert(&mut self, symbol: impl Into<String>, sector: impl Into<String>) {
        self.sectors.insert(symbol.into(), sector.into());
    }
}

impl CorrelationModel for SectorCorrelationModel {
    fn correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return SAME_SYMBOL;
        }
        match (self.sectors.get(a), self.sectors.get(b)) {
            (Some(sa), Some(sb)) if sa == sb => SAME_SECTOR,
            _ => CROSS_SECTOR,
        }
    }

    fn sector(&self, symbol: &str) -> Option<String> {
        self.sectors.get(symbol).cloned()
    }
}

/// Pearson correlation of recorded daily returns, falling back to the
/// sector model when either series is too short.
pub struct HistoricalCorrelationModel {
    returns: RwLock<HashMap<String, Vec<f64>>>,
    fallback: SectorCorrelationModel,
}

impl HistoricalCorrelationModel {
    pub fn new(fallback: SectorCorrelationModel) -> Self {
        Self {
            returns: RwLock::new(HashMap::new()),
            fallback,
        }
    }

    /// Replace the return series for `symbol`. Ordered oldest first.
    pub fn set_returns(&self, symbol: &str, returns: Vec<f64>) {
        self.returns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string(), returns);
    }

    pub fn has_returns(&self, symbol: &str) -> bool {
        self.returns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .is_some_and(|r| r.len() >= MIN_OVERLAP)
    }
}

impl CorrelationModel for HistoricalCorrelationModel {
    fn correlation(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return SAME_SYMBOL;
        }
        let returns = self.returns.read().unwrap_or_else(PoisonError::into_inner);
        if let (Some(ra), Some(rb)) = (returns.get(a), returns.get(b)) {
            if let Some(c) = pearson(ra, rb) {
                return c;
            }
        }
        self.fallback.correlation(a, b)
    }

    fn sector(&self, symbol: &str) -> Option<String> {
        self.fallback.sector(symbol)
    }
}

/// Pearson correlation over the most recent overlapping observations.
///
/// `None` with fewer than [`MIN_OVERLAP`] observations or a flat series.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < MIN_OVERLAP {
        return None;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a < 1e-15 || var_b < 1e-15 {
        return None;
    }
    Some((cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0))
}

/// Market-value weighted correlation of `symbol` against the open positions.
/// Zero with no exposure.
pub fn weighted_correlation(
    model: &dyn CorrelationModel,
    symbol: &str,
    positions: &[Position],
) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for position in positions {
        let value = position.market_value().to_f64().unwrap_or(0.0);
        weighted += value * model.correlation(symbol, &position.symbol);
        total += value;
    }
    if total <= 0.0 {
        0.0
    } else {
        weighted / total
    }
}

/// Exposure per sector. A position's own sector tag wins over the model.
pub fn sector_exposures(
    model: &dyn CorrelationModel,
    positions: &[Position],
) -> BTreeMap<String, Decimal> {
    let mut exposures = BTreeMap::new();
    for position in positions {
        let sector = position
            .sector
            .clone()
            .or_else(|| model.sector(&position.symbol))
            .unwrap_or_else(|| UNCLASSIFIED.to_string());
        *exposures.entry(sector).or_insert(Decimal::ZERO) += position.market_value();
    }
    exposures
}

/// Largest addition to `sector` that keeps it within `max_single` of
/// `total_value` and keeps the two largest sectors within `max_top_two`.
///
/// When the addition stays smaller than the second-largest other sector the
/// top two are unchanged, so the top-two limit does not bind.
pub fn max_sector_size(
    total_value: Decimal,
    exposures: &BTreeMap<String, Decimal>,
    sector: &str,
    max_single: f64,
    max_top_two: f64,
) -> Decimal {
    let current = exposures.get(sector).copied().unwrap_or(Decimal::ZERO);
    let mut others: Vec<Decimal> = exposures
        .iter()
        .filter(|(name, _)| name.as_str() != sector)
        .map(|(_, value)| *value)
        .collect();
    others.sort_by(|a, b| b.cmp(a));
    let largest_other = others.first().copied().unwrap_or(Decimal::ZERO);
    let second_other = others.get(1).copied().unwrap_or(Decimal::ZERO);

    let single_cap = total_value * fraction(max_single) - current;
    let top_two_cap = total_value * fraction(max_top_two) - current - largest_other;
    let below_second = second_other - current;

    single_cap.min(top_two_cap.max(below_second)).max(Decimal::ZERO)
}

fn fraction(value: f64) -> Decimal {
    Decimal::try_from(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, value: Decimal, sector: Option<&str>) -> Position {
        Position {
            symbol: symbol.to_string(),
            quantity: dec!(1),
            entry_price: value,
            current_price: value,
            sector: sector.map(str::to_string),
        }
    }

    #[test]
    fn sector_lookup() {
        let model = SectorCorrelationModel::with_defaults();
        assert_eq!(model.correlation("AAPL", "AAPL"), 1.0);
        assert_eq!(model.correlation("AAPL", "MSFT"), 0.7);
        assert_eq!(model.correlation("AAPL", "XOM"), 0.2);
        assert_eq!(model.correlation("AAPL", "UNKNOWN"), 0.2);
        assert_eq!(model.sector("BTC-USD").as_deref(), Some("crypto"));
    }

    #[test]
    fn weighted_by_market_value() {
        let model = SectorCorrelationModel::with_defaults();
        let positions = vec![
            position("MSFT", dec!(3000), None),
            position("XOM", dec!(1000), None),
        ];
        let c = weighted_correlation(&model, "AAPL", &positions);
        assert!((c - (0.7 * 3000.0 + 0.2 * 1000.0) / 4000.0).abs() < 1e-12);
        assert_eq!(weighted_correlation(&model, "AAPL", &[]), 0.0);
    }

    #[test]
    fn pearson_detects_comovement() {
        let a: Vec<f64> = (0..30).map(|i| ((i * 7) % 11) as f64 / 100.0 - 0.05).collect();
        let same: Vec<f64> = a.iter().map(|r| r * 2.0).collect();
        let inverse: Vec<f64> = a.iter().map(|r| -r).collect();
        assert!((pearson(&a, &same).unwrap() - 1.0).abs() < 1e-9);
        assert!((pearson(&a, &inverse).unwrap() + 1.0).abs() < 1e-9);
        assert!(pearson(&a[..10], &same[..10]).is_none());
    }

    #[test]
    fn historical_model_falls_back_without_returns() {
        let model = HistoricalCorrelationModel::new(SectorCorrelationModel::with_defaults());
        assert_eq!(model.correlation("AAPL", "MSFT"), 0.7);

        let a: Vec<f64> = (0..25).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        let b: Vec<f64> = a.iter().map(|r| -r).collect();
        model.set_returns("AAPL", a);
        model.set_returns("MSFT", b);
        assert!(model.has_returns("AAPL"));
        assert!((model.correlation("AAPL", "MSFT") + 1.0).abs() < 1e-9);
    }

    #[test]
    fn exposures_prefer_position_tags() {
        let model = SectorCorrelationModel::with_defaults();
        let exposures = sector_exposures(
            &model,
            &[
                position("AAPL", dec!(1000), None),
                position("MSFT", dec!(500), Some("software")),
                position("ZZZ", dec!(200), None),
            ],
        );
        assert_eq!(exposures["technology"], dec!(1000));
        assert_eq!(exposures["software"], dec!(500));
        assert_eq!(exposures[UNCLASSIFIED], dec!(200));
    }

    #[test]
    fn single_sector_cap_binds() {
        let mut exposures = BTreeMap::new();
        exposures.insert("technology".to_string(), dec!(3000));
        let cap = max_sector_size(dec!(10000), &exposures, "technology", 0.4, 0.6);
        assert_eq!(cap, dec!(1000));
    }

    #[test]
    fn top_two_cap_binds() {
        let mut exposures = BTreeMap::new();
        exposures.insert("technology".to_string(), dec!(2500));
        exposures.insert("energy".to_string(), dec!(3000));
        exposures.insert("crypto".to_string(), dec!(500));
        // Single cap allows 1500, but tech + energy may only reach 6000.
        let cap = max_sector_size(dec!(10000), &exposures, "technology", 0.4, 0.6);
        assert_eq!(cap, dec!(500));
    }

    #[test]
    fn small_sector_below_second_is_not_top_two_bound() {
        let mut exposures = BTreeMap::new();
        exposures.insert("technology".to_string(), dec!(3000));
        exposures.insert("energy".to_string(), dec!(3000));
        let cap = max_sector_size(dec!(10000), &exposures, "crypto", 0.4, 0.6);
        assert_eq!(cap, dec!(3000));
        let full = max_sector_size(dec!(10000), &exposures, "technology", 0.4, 0.6);
        assert_eq!(full, Decimal::ZERO);
    }
}
