//! Codec modules for the marshaller.

use chrono::DateTime;
use serde_json::{Map, Value};

/// Marker key identifying a flattened array on the wire.
pub const LIST_MARKER: &str = "@list";

/// Marker key identifying a protected timestamp on the wire.
pub const TS_MARKER: &str = "@ts";

/// One step of the wire conversion.
///
/// Codecs are consulted in order on both directions; the first match wins.
/// A recursive codec has the marshaller re-encode the children of its
/// output (resp. decode the children of its input before `decode` runs).
pub trait WireCodec: Send + Sync {
    /// Stable identifier, for diagnostics.
    fn id(&self) -> &'static str;

    /// Whether the marshaller recurses through this codec's output/input.
    fn recursive(&self) -> bool {
        true
    }

    /// Does this codec handle the given plain-side value?
    fn test(&self, value: &Value) -> bool;

    /// Plain → wire.
    fn encode(&self, value: &Value) -> Value;

    /// Does this codec handle the given wire-side value?
    fn test_wire(&self, value: &Value) -> bool;

    /// Wire → plain.
    fn decode(&self, value: &Value) -> Value;
}

/// Flattens arrays into marker objects with stringified numeric keys.
///
/// `[a, b]` becomes `{"@list": true, "0": a, "1": b}`. The store cannot
/// hold arrays nested inside documents, so this codec is always first in
/// the list and applies recursively.
pub struct ListCodec;

impl WireCodec for ListCodec {
    fn id(&self) -> &'static str {
        "list"
    }

    fn test(&self, value: &Value) -> bool {
        value.is_array()
    }

    fn encode(&self, value: &Value) -> Value {
        let Value::Array(items) = value else {
            return value.clone();
        };
        let mut map = Map::with_capacity(items.len() + 1);
        map.insert(LIST_MARKER.to_string(), Value::Bool(true));
        for (index, item) in items.iter().enumerate() {
            map.insert(index.to_string(), item.clone());
        }
        Value::Object(map)
    }

    fn test_wire(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|map| map.contains_key(LIST_MARKER))
    }

    fn decode(&self, value: &Value) -> Value {
        let Value::Object(map) = value else {
            return value.clone();
        };
        let mut indexed: Vec<(usize, &Value)> = map
            .iter()
            .filter(|(key, _)| key.as_str() != LIST_MARKER)
            .filter_map(|(key, item)| key.parse::<usize>().ok().map(|i| (i, item)))
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        Value::Array(indexed.into_iter().map(|(_, item)| item.clone()).collect())
    }
}

/// Protects RFC 3339 timestamp strings behind a marker object so backends
/// that coerce date-like values cannot corrupt them.
///
/// `"2024-05-01T12:00:00Z"` becomes `{"@ts": "2024-05-01T12:00:00Z"}`.
pub struct TimestampCodec;

impl WireCodec for TimestampCodec {
    fn id(&self) -> &'static str {
        "timestamp"
    }

    fn recursive(&self) -> bool {
        false
    }

    fn test(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok())
    }

    fn encode(&self, value: &Value) -> Value {
        let mut map = Map::with_capacity(1);
        map.insert(TS_MARKER.to_string(), value.clone());
        Value::Object(map)
    }

    fn test_wire(&self, value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|map| map.len() == 1 && map.contains_key(TS_MARKER))
    }

    fn decode(&self, value: &Value) -> Value {
        value
            .as_object()
            .and_then(|map| map.get(TS_MARKER))
            .cloned()
            .unwrap_or_else(|| value.clone())
    }
}
