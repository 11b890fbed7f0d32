use std::fmt::Write as _;

use quorum_cache::CostOptimizer;
use quorum_models::MarketData;
use uuid::Uuid;

use crate::provider::ProviderRequest;

/// Reply schema included in the system prompt.
fn response_schema() -> String {
    let example = serde_json::json!({
        "action": "BUY | SELL | HOLD",
        "confidence": 0.72,
        "entry_price": 64250.0,
        "stop_loss": 62900.0,
        "take_profit": 67000.0,
        "reasoning": "<two or three sentences>"
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

pub fn signal_system_prompt() -> String {
    format!(
        "You are one member of an ensemble of independent trading analysts. Given a market \
         snapshot for a single symbol, recommend exactly one action for the next session.\n\n\
         ## RULES\n\n\
         - `action` is one of BUY, SELL or HOLD. Prefer HOLD when the evidence is mixed.\n\
         - `confidence` is a number between 0 and 1 reflecting how strongly the data supports \
         the action. Do not exceed 0.9 unless trend, momentum and volume all agree.\n\
         - Price levels are optional. When given, a BUY needs stop_loss < entry_price < \
         take_profit and a SELL the reverse.\n\
         - Keep `reasoning` short and specific to the numbers provided.\n\n\
         ## RESPONSE FORMAT\n\n\
         Respond with a single JSON object and nothing else:\n\n{}",
        response_schema()
    )
}

/// Render the market snapshot as the user prompt.
///
/// The timestamp is left out so identical market conditions produce identical
/// prompts and hit the response cache.
pub fn market_prompt(market: &MarketData) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Symbol: {}", market.symbol);
    let _ = writeln!(prompt, "Price: {}", market.price);
    let _ = writeln!(prompt, "24h high: {}", market.high_24h);
    let _ = writeln!(prompt, "24h low: {}", market.low_24h);
    let _ = writeln!(prompt, "Volume: {:.2}", market.volume);
    if market.average_volume > 0.0 {
        let _ = writeln!(prompt, "Average volume: {:.2}", market.average_volume);
    }
    let _ = writeln!(prompt, "Daily volatility: {:.2}%", market.volatility * 100.0);
    let _ = writeln!(prompt, "Trend: {:?}", market.trend);
    let _ = writeln!(prompt, "Momentum: {:+.2}%", market.momentum * 100.0);
    if let Some(support) = market.support {
        let _ = writeln!(prompt, "Support: {support}");
    }
    if let Some(resistance) = market.resistance {
        let _ = writeln!(prompt, "Resistance: {resistance}");
    }
    if let Some(index) = market.fear_greed_index {
        let _ = writeln!(prompt, "Fear & greed index: {index}/100");
    }
    prompt
}

pub fn build_signal_request(market: &MarketData, optimizer: &CostOptimizer) -> ProviderRequest {
    let optimized = optimizer.optimize_prompt(&market_prompt(market));
    ProviderRequest {
        request_id: Uuid::new_v4(),
        symbol: market.symbol.clone(),
        system_prompt: signal_system_prompt(),
        prompt: optimized.text,
        market: market.clone(),
    }
}
