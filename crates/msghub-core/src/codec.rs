// SPDX-License-Identifier: MIT OR Apache-2.0
//! Map-preserving JSON codec.
//!
//! JSON has no Map type, so Map values are written as a tagged record:
//!
//! ```json
//! {"__msghubType": "Map", "entries": [["key", value], ...]}
//! ```
//!
//! The marker key and tag are crate constants; the default must be
//! preserved across restarts because the persisted document depends on it.
//! Typed encode/decode goes through serde (the Map-aware types carry their
//! own impls); the value-level helpers here are what the archive's diff
//! engine uses to treat tagged records as maps.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Reserved key marking a tagged Map record.
pub const MAP_TYPE_KEY: &str = "__msghubType";
/// Tag value identifying a Map.
pub const MAP_TYPE_TAG: &str = "Map";

/// Errors produced by the codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value could not be serialized to JSON.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
    /// The input could not be parsed into the target type.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serialize a value to its persisted JSON string form.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] when serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

/// Parse a persisted JSON string back into a typed value.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] when parsing fails.
pub fn decode<T: DeserializeOwned>(input: &str) -> Result<T, CodecError> {
    serde_json::from_str(input).map_err(CodecError::Decode)
}

/// Returns `true` when `value` is a tagged Map record (default marker).
#[must_use]
pub fn is_map_value(value: &Value) -> bool {
    is_map_value_with(value, MAP_TYPE_KEY)
}

/// Returns `true` when `value` is a tagged Map record under a custom marker.
#[must_use]
pub fn is_map_value_with(value: &Value, marker: &str) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get(marker))
        .and_then(Value::as_str)
        == Some(MAP_TYPE_TAG)
}

/// Extract the `[key, value]` entry pairs of a tagged Map record.
///
/// Returns `None` when `value` is not a tagged Map, and skips entries that
/// are not two-element arrays with a string key.
#[must_use]
pub fn map_entries(value: &Value) -> Option<Vec<(String, Value)>> {
    if !is_map_value(value) {
        return None;
    }
    let entries = value.get("entries")?.as_array()?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let pair = entry.as_array()?;
        if pair.len() != 2 {
            return None;
        }
        let key = pair[0].as_str()?;
        out.push((key.to_string(), pair[1].clone()));
    }
    Some(out)
}

/// Build a tagged Map record from entry pairs.
#[must_use]
pub fn map_value_from_entries<I>(entries: I) -> Value
where
    I: IntoIterator<Item = (String, Value)>,
{
    let entries: Vec<Value> = entries
        .into_iter()
        .map(|(k, v)| Value::Array(vec![Value::String(k), v]))
        .collect();
    serde_json::json!({
        MAP_TYPE_KEY: MAP_TYPE_TAG,
        "entries": entries,
    })
}

/// Structural equality over JSON values with Map awareness.
///
/// Tagged Map records compare by key set regardless of entry order; plain
/// arrays compare positionally; objects compare by key; everything else by
/// value identity.
#[must_use]
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (map_entries(a), map_entries(b)) {
        (Some(ea), Some(eb)) => {
            if ea.len() != eb.len() {
                return false;
            }
            let mut right: std::collections::BTreeMap<&str, &Value> =
                eb.iter().map(|(k, v)| (k.as_str(), v)).collect();
            ea.iter().all(|(k, v)| {
                right
                    .remove(k.as_str())
                    .is_some_and(|other| deep_equal(v, other))
            })
        }
        (Some(_), None) | (None, Some(_)) => false,
        (None, None) => match (a, b) {
            (Value::Array(xs), Value::Array(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y))
            }
            (Value::Object(xs), Value::Object(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .all(|(k, v)| ys.get(k).is_some_and(|other| deep_equal(v, other)))
            }
            _ => a == b,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_map_detection() {
        let tagged = map_value_from_entries(vec![("a".to_string(), json!(1))]);
        assert!(is_map_value(&tagged));
        assert!(!is_map_value(&json!({"entries": []})));
        assert!(!is_map_value(&json!(null)));
    }

    #[test]
    fn entries_roundtrip() {
        let tagged = map_value_from_entries(vec![
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!({"x": true})),
        ]);
        let entries = map_entries(&tagged).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "a");
        assert_eq!(entries[1].1, json!({"x": true}));
    }

    #[test]
    fn deep_equal_ignores_map_entry_order() {
        let a = map_value_from_entries(vec![
            ("x".to_string(), json!(1)),
            ("y".to_string(), json!(2)),
        ]);
        let b = map_value_from_entries(vec![
            ("y".to_string(), json!(2)),
            ("x".to_string(), json!(1)),
        ]);
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn deep_equal_is_positional_for_arrays() {
        assert!(!deep_equal(&json!([1, 2]), &json!([2, 1])));
        assert!(deep_equal(&json!([1, 2]), &json!([1, 2])));
    }

    #[test]
    fn deep_equal_distinguishes_map_from_object() {
        let tagged = map_value_from_entries(vec![("a".to_string(), json!(1))]);
        let plain = json!({"a": 1});
        assert!(!deep_equal(&tagged, &plain));
    }

    #[test]
    fn typed_encode_decode_roundtrip() {
        let value = json!({"k": [1, 2, 3], "s": "x"});
        let encoded = encode(&value).unwrap();
        let back: serde_json::Value = decode(&encoded).unwrap();
        assert_eq!(back, value);
    }
}
