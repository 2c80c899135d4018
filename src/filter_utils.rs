use serde_json::{Map, Value};
use std::collections::HashMap;

/// True when a `/markets` entry satisfies every configured `key = value` filter.
pub fn matches_filters(market: &Map<String, Value>, filters: &HashMap<String, String>) -> bool {
    filters.iter().all(|(key, required)| match market.get(key) {
        // e.g. "status": "trading", "quote": "EUR"
        Some(Value::String(s)) => s == required,
        // e.g. "orderTypes": ["market", "limit"]
        Some(Value::Array(arr)) => arr.iter().any(|v| v.as_str() == Some(required.as_str())),
        // e.g. "pricePrecision": 5
        Some(other) => other.to_string() == *required,
        None => false,
    })
}

/// Market identifiers (e.g. `BTC-EUR`) of the entries that pass the filters.
pub fn filtered_market_ids(markets: &[Map<String, Value>], filters: &HashMap<String, String>) -> Vec<String> {
    markets
        .iter()
        .filter(|m| matches_filters(m, filters))
        .filter_map(|m| m.get("market").and_then(Value::as_str).map(String::from))
        .collect()
}
