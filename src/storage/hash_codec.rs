//! Redis hash fields are strings on the wire: numeric fields are numerically
//! valued strings, booleans are `"true"`/`"false"`. This module is the
//! single boundary where that wire shape is decoded into native scalars —
//! the rest of the crate never stringly-types a number or a bool.

use std::collections::HashMap;

pub fn encode_bool(b: bool) -> String {
    if b { "true".to_string() } else { "false".to_string() }
}

pub fn decode_bool(s: &str) -> bool {
    s == "true"
}

pub fn encode_i64(n: i64) -> String {
    n.to_string()
}

pub fn decode_i64(s: &str) -> Option<i64> {
    s.parse().ok()
}

pub fn encode_u64(n: u64) -> String {
    n.to_string()
}

pub fn decode_u64(s: &str) -> Option<u64> {
    s.parse().ok()
}

pub fn encode_f64(n: f64) -> String {
    n.to_string()
}

pub fn decode_f64(s: &str) -> Option<f64> {
    s.parse().ok()
}

/// Convert a `HGETALL` response (a flat field/value vec from `redis`) into a
/// lookup map.
pub fn to_map(fields: Vec<(String, String)>) -> HashMap<String, String> {
    fields.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bool() {
        assert!(decode_bool(&encode_bool(true)));
        assert!(!decode_bool(&encode_bool(false)));
        assert_eq!(encode_bool(true), "true");
        assert_eq!(encode_bool(false), "false");
    }

    #[test]
    fn round_trips_numbers() {
        assert_eq!(decode_i64(&encode_i64(-42)), Some(-42));
        assert_eq!(decode_u64(&encode_u64(42)), Some(42));
        assert_eq!(decode_f64(&encode_f64(3.5)), Some(3.5));
    }
}
