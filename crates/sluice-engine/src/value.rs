//! Loose comparisons over JSON cell values
//!
//! Rows come from many drivers, so a numeric column may arrive as a number
//! from one source and as a string from another. Comparisons coerce numeric
//! strings the way a dynamically typed filter would.

use std::cmp::Ordering;

use serde_json::{Number, Value};

/// Numeric reading of a value, if it has one
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Equality with numeric coercion; strings compare as strings
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(_), _) | (_, Value::Array(_)) | (Value::Object(_), _) | (_, Value::Object(_)) => {
            left == right
        },
        _ => match (as_number(left), as_number(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Ordering with numeric coercion; `None` when the values are not comparable
pub fn loose_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Null, _) | (_, Value::Null) => None,
        _ => as_number(left)?.partial_cmp(&as_number(right)?),
    }
}

/// Text used to look a value up in a string-keyed mapping
///
/// Integral floats render without a fraction, so `1.0` and `1` share a key.
pub fn key_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .and_then(number)
            .map(|normalized| normalized.to_string())
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// JSON number for `f`, integral values as integers
///
/// Returns `None` for NaN and infinities.
pub fn number(f: f64) -> Option<Value> {
    if !f.is_finite() {
        return None;
    }
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        return Some(Value::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number)
}
