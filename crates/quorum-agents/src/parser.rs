use std::str::FromStr;

use chrono::Utc;
use quorum_models::{Action, ProviderSignal};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::ProviderError;

/// Extract the first JSON object from a reply that may wrap it in prose.
///
/// Handles the shapes models actually return:
/// - Clean JSON: `{"action": "BUY"}`
/// - Markdown-wrapped: ```json\n{"action": "BUY"}\n```
/// - Prefix text: `Here is my call:\n{"action": "BUY"}`
pub fn extract_json(text: &str) -> Result<String, ProviderError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(ProviderError::Parse(format!(
        "No valid JSON object found in reply (length={})",
        text.len()
    )))
}

fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                return Some(text[json_start..json_start + end].trim().to_string());
            }
        }
    }

    None
}

/// First balanced `{ ... }`, ignoring braces inside strings.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Normalize a raw provider reply into a [`ProviderSignal`].
///
/// The action is read from `action`, `signal` or `recommendation` with the
/// loose vocabulary of [`Action::parse_loose`]. Confidence may be a number or
/// a string, and values in (1, 100] are read as percentages; the result is
/// clamped into `[0, 1]`. Price levels accept numbers or numeric strings and
/// are dropped when missing, unparseable or non-positive.
pub fn parse_signal(
    provider_id: &str,
    raw: &str,
    latency_ms: u64,
) -> Result<ProviderSignal, ProviderError> {
    let json_str = extract_json(raw)?;
    let value: Value = serde_json::from_str(&json_str)
        .map_err(|e| ProviderError::Parse(format!("Invalid JSON from {provider_id}: {e}")))?;

    let action_raw = ["action", "signal", "recommendation"]
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .ok_or_else(|| ProviderError::Parse(format!("{provider_id} reply has no action field")))?;
    let action = Action::parse_loose(action_raw).ok_or_else(|| {
        ProviderError::Parse(format!("{provider_id} returned unknown action '{action_raw}'"))
    })?;

    let confidence = value
        .get("confidence")
        .and_then(number_like)
        .ok_or_else(|| ProviderError::Parse(format!("{provider_id} reply has no confidence")))?;
    if !confidence.is_finite() {
        return Err(ProviderError::Parse(format!(
            "{provider_id} returned non-finite confidence"
        )));
    }
    let confidence = if confidence > 1.0 && confidence <= 100.0 {
        confidence / 100.0
    } else {
        confidence
    };

    let reasoning = value
        .get("reasoning")
        .or_else(|| value.get("rationale"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(ProviderSignal {
        provider_id: provider_id.to_string(),
        action,
        confidence: confidence.clamp(0.0, 1.0),
        entry_price: price_field(&value, "entry_price"),
        stop_loss: price_field(&value, "stop_loss"),
        take_profit: price_field(&value, "take_profit"),
        reasoning,
        latency_ms,
        timestamp: Utc::now(),
    })
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn price_field(value: &Value, field: &str) -> Option<Decimal> {
    let price = match value.get(field)? {
        Value::Number(n) => n.as_f64().and_then(Decimal::from_f64),
        Value::String(s) => Decimal::from_str(s.trim().trim_start_matches('$')).ok(),
        _ => None,
    }?;
    (price > Decimal::ZERO).then_some(price)
}
