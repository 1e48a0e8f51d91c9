//! Wire-document marshalling for Syncro replicas.
//!
//! The real-time document store cannot hold every shape plain state takes;
//! most importantly it rejects arrays nested inside documents. This crate
//! converts between the two shapes:
//!
//! - [`Marshaller::to_wire`] — plain state → restricted wire document
//! - [`Marshaller::from_wire`] — wire document → plain state
//!
//! The conversions are mutually inverse for any state built from objects,
//! arrays, strings, numbers, booleans, null, and RFC 3339 timestamps.
//!
//! Conversion is driven by an ordered list of [`WireCodec`] modules. The
//! list is extensible, but the array-flattening codec is always first —
//! flattening is what makes a document storable at all, so no extension
//! may displace it.

mod codec;

pub use codec::{ListCodec, TimestampCodec, WireCodec, LIST_MARKER, TS_MARKER};

use serde_json::{Map, Value};

/// Plain caller-side state: one document's top-level keys and values.
pub type StateMap = Map<String, Value>;

/// The restricted document shape held by the real-time store.
pub type WireDoc = Map<String, Value>;

/// Converts state between its plain and wire shapes.
pub struct Marshaller {
    codecs: Vec<Box<dyn WireCodec>>,
}

impl Marshaller {
    /// Creates a marshaller with the built-in codec list
    /// (array flattening, then RFC 3339 timestamps).
    #[must_use]
    pub fn new() -> Self {
        Self::with_codecs(vec![Box::new(TimestampCodec)])
    }

    /// Creates a marshaller with extra codecs appended after the
    /// always-present array codec.
    #[must_use]
    pub fn with_codecs(extra: Vec<Box<dyn WireCodec>>) -> Self {
        let mut codecs: Vec<Box<dyn WireCodec>> = vec![Box::new(ListCodec)];
        codecs.extend(extra);
        Self { codecs }
    }

    /// Encodes plain state into a wire document.
    ///
    /// The input is never mutated; every value in the output is a fresh clone.
    #[must_use]
    pub fn to_wire(&self, state: &StateMap) -> WireDoc {
        state
            .iter()
            .map(|(key, value)| (key.clone(), self.encode_value(value)))
            .collect()
    }

    /// Decodes a wire document back into plain state.
    ///
    /// An absent document decodes to the empty state.
    #[must_use]
    pub fn from_wire(&self, doc: Option<&WireDoc>) -> StateMap {
        let Some(doc) = doc else {
            return StateMap::new();
        };
        doc.iter()
            .map(|(key, value)| (key.clone(), self.decode_value(value)))
            .collect()
    }

    fn encode_value(&self, value: &Value) -> Value {
        for codec in &self.codecs {
            if codec.test(value) {
                let encoded = codec.encode(value);
                return if codec.recursive() {
                    self.encode_children(encoded)
                } else {
                    encoded
                };
            }
        }
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.encode_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn encode_children(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        let encoded = self.encode_value(&v);
                        (k, encoded)
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn decode_value(&self, value: &Value) -> Value {
        for codec in &self.codecs {
            if codec.test_wire(value) {
                let input = if codec.recursive() {
                    self.decode_children(value)
                } else {
                    value.clone()
                };
                return codec.decode(&input);
            }
        }
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.decode_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn decode_children(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.decode_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Default for Marshaller {
    fn default() -> Self {
        Self::new()
    }
}
