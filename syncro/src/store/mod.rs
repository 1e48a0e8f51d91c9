//! Real-time document store abstraction.
//!
//! The engine talks to the real-time backend exclusively through
//! [`DocStore`], addressed by `(collection, doc_id)`. Delivery on
//! subscriptions is assumed at-least-once and eventually consistent; the
//! engine never relies on seeing every intermediate snapshot.

mod memory;

pub use memory::MemoryDocStore;

use async_trait::async_trait;
use syncro_marshal::WireDoc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed document does not exist.
    ///
    /// On write paths this is the recoverable class: the replica asks the
    /// registry service to reinitialize the path and retries.
    #[error("document not found: {collection}/{doc_id}")]
    NotFound { collection: String, doc_id: String },

    /// Any other backend failure.
    #[error("document store: {0}")]
    Backend(String),
}

/// A real-time document store.
///
/// `set` has create-or-replace semantics; `update` merges top-level keys
/// into an existing document and fails with [`StoreError::NotFound`] when
/// the document is absent.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Reads the current document, if any.
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<WireDoc>, StoreError>;

    /// Whether the document exists.
    async fn exists(&self, collection: &str, doc_id: &str) -> Result<bool, StoreError>;

    /// Creates or replaces the document.
    async fn set(&self, collection: &str, doc_id: &str, doc: WireDoc) -> Result<(), StoreError>;

    /// Merges top-level keys into an existing document.
    async fn update(&self, collection: &str, doc_id: &str, patch: WireDoc)
        -> Result<(), StoreError>;

    /// Deletes the document.
    async fn remove(&self, collection: &str, doc_id: &str) -> Result<(), StoreError>;

    /// Subscribes to document snapshots. Dropping the receiver unsubscribes.
    async fn subscribe(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<WireDoc>, StoreError>;
}
