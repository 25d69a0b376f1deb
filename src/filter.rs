//! Content filters: per-field conditions evaluated against a published payload.
//!
//! A condition is either a string or any other JSON value. String conditions
//! starting with `>`, `<` or `=` compare numerically when both sides parse as
//! numbers and fall back to string equality otherwise. Any other string is
//! compared for equality with the field's string form. Non-string conditions
//! must equal the field value.
//!
//! Field values read the way a dynamically typed publisher sees them: booleans
//! count as `1`/`0` and render as `True`/`False`, null renders as `None`.
//! Null, list and object fields never satisfy an operator condition.

use serde_json::{Map, Value};

/// Decide whether `data` satisfies every condition in `filter`.
///
/// An empty filter always matches. A field named by the filter but absent
/// from `data` never matches.
pub fn matches(data: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(field, condition)| match data.get(field) {
        Some(value) => condition_holds(value, condition),
        None => false,
    })
}

fn condition_holds(value: &Value, condition: &Value) -> bool {
    let cond = match condition {
        Value::String(s) => s.trim(),
        other => return loose_eq(value, other),
    };

    let op = match cond.chars().next() {
        Some(c @ ('>' | '<' | '=')) => c,
        _ => return display_value(value) == cond,
    };
    if matches!(value, Value::Null | Value::Array(_) | Value::Object(_)) {
        return false;
    }
    let literal = &cond[1..];

    match (literal.trim().parse::<f64>().ok(), as_number(value)) {
        (Some(bound), Some(actual)) => match op {
            '>' => actual > bound,
            '<' => actual < bound,
            _ => actual == bound,
        },
        _ if op == '=' => display_value(value) == literal,
        _ => display_value(value) == cond,
    }
}

/// Numeric reading of a payload value: JSON numbers, booleans, or strings that parse as one.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String form of a payload value. Strings render bare, booleans and null in
/// their `True`/`False`/`None` spelling, everything else as JSON.
pub(crate) fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Structural equality where numbers compare by value, so `32` equals `32.0`.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}
