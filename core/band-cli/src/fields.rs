//! `key=value` arguments for `smartband report`.

use serde_json::{Map, Value};

/// Parses each `key=value` pair into a reported-state document.
///
/// Values that parse as JSON (numbers, booleans, null, quoted strings) keep
/// their type; anything else is taken as a bare string. A later pair with the
/// same key wins.
pub fn parse_fields(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut fields = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("missing key in '{}'", pair));
        }
        fields.insert(key.to_string(), parse_value(raw.trim()));
    }
    Ok(fields)
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
