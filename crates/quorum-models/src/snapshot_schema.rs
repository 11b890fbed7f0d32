use serde::{Deserialize, Serialize};

/// Categories of rows in the shared snapshot store.
/// External market-data and position pipelines use these when writing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotCategory {
    MarketData,
    Positions,
    PortfolioHistory,
    Returns,
}

impl SnapshotCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotCategory::MarketData => "market_data",
            SnapshotCategory::Positions => "positions",
            SnapshotCategory::PortfolioHistory => "portfolio_history",
            SnapshotCategory::Returns => "returns",
        }
    }
}

/// The SQLite table external pipelines write and the decision core reads.
pub const SNAPSHOT_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    category    TEXT NOT NULL,
    value_json  TEXT NOT NULL,
    source      TEXT NOT NULL,
    symbol      TEXT,
    created_at  TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_category ON cache_entries(category);
CREATE INDEX IF NOT EXISTS idx_cache_symbol ON cache_entries(symbol);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);
";

/// Key conventions for the snapshot store.
///
/// - Market data: `market:{symbol}` holding a `MarketData` JSON object
/// - Open positions: `portfolio:positions` holding a `Vec<Position>`
/// - Portfolio history: `portfolio:history` holding a `Vec<PortfolioPoint>`
/// - Daily returns: `returns:{symbol}` holding a `Vec<f64>`
pub mod key_patterns {
    pub const POSITIONS: &str = "portfolio:positions";
    pub const PORTFOLIO_HISTORY: &str = "portfolio:history";

    pub fn market(symbol: &str) -> String {
        format!("market:{symbol}")
    }

    pub fn returns(symbol: &str) -> String {
        format!("returns:{symbol}")
    }
}

/// A raw row as read from SQLite.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub key: String,
    pub category: String,
    pub value_json: String,
    pub source: String,
    pub symbol: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_pattern_market() {
        assert_eq!(key_patterns::market("BTC-USD"), "market:BTC-USD");
    }

    #[test]
    fn key_pattern_returns() {
        assert_eq!(key_patterns::returns("AAPL"), "returns:AAPL");
    }

    #[test]
    fn category_names_match_serde() {
        let categories = [
            SnapshotCategory::MarketData,
            SnapshotCategory::Positions,
            SnapshotCategory::PortfolioHistory,
            SnapshotCategory::Returns,
        ];
        for cat in categories {
            let json = serde_json::to_string(&cat).unwrap();
            assert_eq!(json, format!("\"{}\"", cat.as_str()));
        }
    }
}
