//! Helpers for the loosely typed settings maps the query editor produces.
//!
//! The editor sends numbers as strings as often as it sends them as numbers,
//! so every reader here accepts both.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Number, Value};

/// Ordered key/value settings of a bucket or metric aggregation
pub type Settings = Map<String, Value>;

/// Read a setting as text. Numbers and booleans are rendered.
pub fn setting_str(settings: &Settings, key: &str) -> Option<String> {
    match settings.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Coerce a number or numeric string to an integer, truncating fractions.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
        }
        _ => None,
    }
}

/// Coerce a number or numeric string to a float.
pub fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.trim().parse::<bool>().ok(),
        _ => None,
    }
}

/// JSON number for `f`, written as an integer when it has no fraction.
pub fn json_number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Remove every setting whose value is the literal string `"null"`.
pub fn strip_null_strings(settings: &mut Settings) {
    settings.retain(|_, v| v.as_str() != Some("null"));
}

/// Deserialize a missing or `null` value as its default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
