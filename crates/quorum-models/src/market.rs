use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Momentum (fractional rate of change) opposing the trend by more than this
/// is read as a reversal.
const REVERSAL_MOMENTUM: f64 = 0.01;

/// Intraday range as a fraction of price above which the market is volatile.
const VOLATILE_RANGE: f64 = 0.08;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

/// Point-in-time market data for one symbol, as supplied by the market data feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketData {
    pub symbol: String,
    pub price: Decimal,
    pub volume: f64,
    /// Trailing average volume, used to judge liquidity. Zero when unknown.
    #[serde(default)]
    pub average_volume: f64,
    pub high_24h: Decimal,
    pub low_24h: Decimal,
    /// Daily volatility as a fraction (0.02 = 2%).
    pub volatility: f64,
    pub trend: Trend,
    /// Fractional rate of change over the feed's momentum window.
    pub momentum: f64,
    pub support: Option<Decimal>,
    pub resistance: Option<Decimal>,
    /// 0 (extreme fear) to 100 (extreme greed), when the feed carries it.
    #[serde(default)]
    pub fear_greed_index: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl MarketData {
    /// 24h range as a fraction of the current price.
    pub fn range_fraction(&self) -> f64 {
        let price = self.price.to_f64().unwrap_or(0.0);
        if price <= 0.0 {
            return 0.0;
        }
        let range = (self.high_24h - self.low_24h).to_f64().unwrap_or(0.0);
        (range / price).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityRegime {
    /// Classify a daily volatility fraction.
    pub fn classify(daily_volatility: f64) -> Self {
        if daily_volatility < 0.01 {
            VolatilityRegime::Low
        } else if daily_volatility < 0.03 {
            VolatilityRegime::Normal
        } else if daily_volatility < 0.06 {
            VolatilityRegime::High
        } else {
            VolatilityRegime::Extreme
        }
    }
}

/// Volatility reading handed to the risk engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MarketVolatility {
    pub daily_volatility: f64,
    pub regime: VolatilityRegime,
}

impl MarketVolatility {
    pub fn from_daily(daily_volatility: f64) -> Self {
        Self {
            daily_volatility,
            regime: VolatilityRegime::classify(daily_volatility),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Neutral,
    Reversal,
    Volatile,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TradingSession {
    Opening,
    Regular,
    Closing,
    AfterHours,
}

impl TradingSession {
    /// Classify an hour of the day (UTC) against the configured session.
    ///
    /// The first session hour is `Opening`, the last is `Closing`. An equal
    /// open and close hour means a round-the-clock market, always `Regular`.
    /// Sessions may wrap past midnight.
    pub fn from_hour(hour_utc: u32, open_hour_utc: u32, close_hour_utc: u32) -> Self {
        let open = open_hour_utc % 24;
        let close = close_hour_utc % 24;
        if open == close {
            return TradingSession::Regular;
        }
        let length = (close + 24 - open) % 24;
        let offset = (hour_utc % 24 + 24 - open) % 24;
        if offset >= length {
            TradingSession::AfterHours
        } else if offset == 0 {
            TradingSession::Opening
        } else if offset == length - 1 {
            TradingSession::Closing
        } else {
            TradingSession::Regular
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    ExtremeFear,
    Fear,
    Neutral,
    Greed,
    ExtremeGreed,
}

impl Sentiment {
    pub fn from_fear_greed(index: Option<u8>) -> Self {
        match index {
            None => Sentiment::Neutral,
            Some(0..=24) => Sentiment::ExtremeFear,
            Some(25..=44) => Sentiment::Fear,
            Some(45..=55) => Sentiment::Neutral,
            Some(56..=75) => Sentiment::Greed,
            Some(_) => Sentiment::ExtremeGreed,
        }
    }

    pub fn is_fearful(&self) -> bool {
        matches!(self, Sentiment::ExtremeFear | Sentiment::Fear)
    }

    pub fn is_greedy(&self) -> bool {
        matches!(self, Sentiment::Greed | Sentiment::ExtremeGreed)
    }
}

/// Qualitative market state consumed by the risk engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketCondition {
    pub regime: MarketRegime,
    pub liquidity: Liquidity,
    pub session: TradingSession,
    pub sentiment: Sentiment,
}

impl Default for MarketCondition {
    fn default() -> Self {
        Self {
            regime: MarketRegime::Neutral,
            liquidity: Liquidity::Normal,
            session: TradingSession::Regular,
            sentiment: Sentiment::Neutral,
        }
    }
}

impl MarketCondition {
    pub fn from_market_data(
        market: &MarketData,
        hour_utc: u32,
        open_hour_utc: u32,
        close_hour_utc: u32,
    ) -> Self {
        let reversal = match market.trend {
            Trend::Bullish => market.momentum < -REVERSAL_MOMENTUM,
            Trend::Bearish => market.momentum > REVERSAL_MOMENTUM,
            Trend::Neutral => false,
        };

        let regime = if market.range_fraction() > VOLATILE_RANGE {
            MarketRegime::Volatile
        } else if reversal {
            MarketRegime::Reversal
        } else {
            match market.trend {
                Trend::Bullish => MarketRegime::TrendingUp,
                Trend::Bearish => MarketRegime::TrendingDown,
                Trend::Neutral => MarketRegime::Neutral,
            }
        };

        let liquidity = if market.average_volume <= 0.0 {
            Liquidity::Normal
        } else {
            let ratio = market.volume / market.average_volume;
            if ratio < 0.5 {
                Liquidity::Low
            } else if ratio > 1.5 {
                Liquidity::High
            } else {
                Liquidity::Normal
            }
        };

        Self {
            regime,
            liquidity,
            session: TradingSession::from_hour(hour_utc, open_hour_utc, close_hour_utc),
            sentiment: Sentiment::from_fear_greed(market.fear_greed_index),
        }
    }
}
