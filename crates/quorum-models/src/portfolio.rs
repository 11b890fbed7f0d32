use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position as reported by the position store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    /// Sector tag, when the position store knows it.
    #[serde(default)]
    pub sector: Option<String>,
}

impl Position {
    /// Absolute market value of the position.
    pub fn market_value(&self) -> Decimal {
        (self.quantity * self.current_price).abs()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * self.quantity
    }
}

/// One point of the portfolio value history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

/// Point-in-time view of the portfolio, supplied at decision time and never
/// persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub total_value: Decimal,
    pub open_positions: Vec<Position>,
    /// Ordered oldest first.
    pub historical_values: Vec<PortfolioPoint>,
}

impl PortfolioSnapshot {
    pub fn exposure(&self) -> Decimal {
        self.open_positions.iter().map(Position::market_value).sum()
    }

    /// Value series ending with the current total value.
    pub fn value_series(&self) -> Vec<Decimal> {
        let mut values: Vec<Decimal> = self.historical_values.iter().map(|p| p.value).collect();
        if values.last() != Some(&self.total_value) {
            values.push(self.total_value);
        }
        values
    }
}
