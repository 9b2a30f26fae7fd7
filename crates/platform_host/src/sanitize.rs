//! Sanitizer for documents read back from host storage.
//!
//! Stored documents come from a medium the kernel does not control (hand edits, older builds,
//! other tabs). Every document is parsed with a parse-or-none contract and walked recursively to
//! strip keys that alias object-model machinery in script hosts sharing the same store.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Object keys removed at every depth before a stored document is trusted.
pub const RESERVED_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Returns `true` when `key` is one of [`RESERVED_KEYS`].
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Recursively removes reserved keys from every object inside `value`.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sanitize_map(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        other => other,
    }
}

fn sanitize_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter(|(key, _)| !is_reserved_key(key))
        .map(|(key, value)| (key, sanitize_value(value)))
        .collect()
}

/// Parses `raw` as JSON and sanitizes it. Malformed text resolves to `None`.
pub fn parse_sanitized(raw: &str) -> Option<Value> {
    serde_json::from_str::<Value>(raw).ok().map(sanitize_value)
}

/// Parses, sanitizes, and deserializes `raw` into `T`.
///
/// Returns `None` for malformed text and for documents whose shape does not match `T`.
pub fn parse_document<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let value = parse_sanitized(raw)?;
    serde_json::from_value(value).ok()
}
