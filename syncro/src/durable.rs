//! Durable relational store abstraction.
//!
//! Entity handlers pull canonical data from, and push flushed state back
//! to, the durable store through this seam. Failures cross the boundary
//! in the normalized `{code, message}` shape and are converted into
//! [`SyncroError`](crate::SyncroError) by the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

/// Normalized durable-store failure.
#[derive(Debug, Clone, Error)]
#[error("durable store [{code}]: {message}")]
pub struct DurableError {
    /// Machine-readable failure class.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl DurableError {
    /// Creates an error from its code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Query access to the durable relational store, keyed by table and row id.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetches one row as a JSON value, `None` when absent.
    async fn fetch(&self, table: &str, id: Uuid) -> Result<Option<Value>, DurableError>;

    /// Merges a patch into a row, creating it when absent.
    async fn merge(&self, table: &str, id: Uuid, patch: Value) -> Result<(), DurableError>;

    /// Replaces a row wholesale.
    async fn replace(&self, table: &str, id: Uuid, value: Value) -> Result<(), DurableError>;
}

/// An in-memory [`DurableStore`] for tests.
#[derive(Default)]
pub struct MemoryDurableStore {
    rows: RwLock<HashMap<(String, Uuid), Value>>,
}

impl MemoryDurableStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a row back out, for assertions.
    #[must_use]
    pub fn row(&self, table: &str, id: Uuid) -> Option<Value> {
        self.rows
            .read()
            .unwrap()
            .get(&(table.to_string(), id))
            .cloned()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn fetch(&self, table: &str, id: Uuid) -> Result<Option<Value>, DurableError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .get(&(table.to_string(), id))
            .cloned())
    }

    async fn merge(&self, table: &str, id: Uuid, patch: Value) -> Result<(), DurableError> {
        let mut rows = self.rows.write().unwrap();
        let slot = rows
            .entry((table.to_string(), id))
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        match (slot, patch) {
            (Value::Object(row), Value::Object(patch)) => {
                for (k, v) in patch {
                    row.insert(k, v);
                }
            }
            (slot, patch) => *slot = patch,
        }
        Ok(())
    }

    async fn replace(&self, table: &str, id: Uuid, value: Value) -> Result<(), DurableError> {
        self.rows
            .write()
            .unwrap()
            .insert((table.to_string(), id), value);
        Ok(())
    }
}
