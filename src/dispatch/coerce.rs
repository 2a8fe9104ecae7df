//! Lenient coercion of loosely typed intent fields
//!
//! Callers send JSON values of whatever shape is convenient for them
//! (`"5"`, `5`, `5.0`, `true`). These helpers normalize them the same way for
//! every field and fall back to a fixed default rather than failing where the
//! field allows it.

use serde_json::Value;

use crate::protocol::Direction;

/// Coerce a value to an integer
///
/// Accepts integers, floats (truncated toward zero), booleans (1/0) and
/// strings holding a decimal integer (surrounding whitespace ignored).
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| u.min(i64::MAX as u64) as i64))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce a value to a direction code
///
/// Numbers are taken as codes; strings may be one of
/// `keep|forward|fwd|reverse|rev|toggle` (any case) or a numeric code.
/// Anything else, including codes outside 0-3, yields [`Direction::Keep`].
pub fn coerce_direction(value: &Value) -> Direction {
    let code = match value {
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "keep" => return Direction::Keep,
            "forward" | "fwd" => return Direction::Forward,
            "reverse" | "rev" => return Direction::Reverse,
            "toggle" => return Direction::Toggle,
            other => other.parse::<i64>().ok(),
        },
        other => coerce_int(other),
    };
    code.and_then(|c| u8::try_from(c).ok())
        .and_then(Direction::from_code)
        .unwrap_or(Direction::Keep)
}

/// Coerce a value to a boolean
///
/// `true`, nonzero numbers (after truncation) and the strings
/// `1|true|on|yes` (any case) are true; everything else is false.
pub fn coerce_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(_) => coerce_int(value).is_some_and(|i| i != 0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "on" | "yes"
        ),
        _ => false,
    }
}
