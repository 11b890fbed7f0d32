use quorum_models::{Liquidity, MarketCondition, MarketRegime, TradingSession, VolatilityRegime};

pub fn volatility_multiplier(regime: VolatilityRegime) -> f64 {
    match regime {
        VolatilityRegime::Low => 1.2,
        VolatilityRegime::Normal => 1.0,
        VolatilityRegime::High => 0.5,
        VolatilityRegime::Extreme => 0.3,
    }
}

pub fn market_condition_multiplier(condition: &MarketCondition) -> f64 {
    match (condition.regime, condition.liquidity) {
        (MarketRegime::Reversal, _) => 0.6,
        (MarketRegime::Volatile, _) => 0.7,
        (MarketRegime::Neutral, Liquidity::Low) => 0.8,
        _ => 1.0,
    }
}

pub fn session_multiplier(session: TradingSession) -> f64 {
    match session {
        TradingSession::Opening | TradingSession::Closing => 0.8,
        TradingSession::AfterHours => 0.5,
        TradingSession::Regular => 1.0,
    }
}

pub fn sentiment_multiplier(condition: &MarketCondition) -> f64 {
    if condition.sentiment.is_fearful() {
        0.8
    } else if condition.sentiment.is_greedy() {
        0.9
    } else {
        1.0
    }
}
