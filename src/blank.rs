//! Blank-value checks for JSON payloads

use serde_json::{Map, Value};

/// Whether a value carries no meaningful content
///
/// `null`, whitespace-only strings and empty arrays/objects are blank.
/// Numbers and booleans never are, so `0` and `false` survive filtering.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Number(_) | Value::Bool(_) => false,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

/// Drop blank entries from an object
pub fn filter_filled(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().filter(|(_, v)| !is_blank(v)).collect()
}
