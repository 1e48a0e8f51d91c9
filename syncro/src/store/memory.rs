//! In-memory document store.
//!
//! Backs the test suite and any embedded usage that does not need a real
//! real-time backend. Snapshot notifications are suppressed when a write
//! leaves the document unchanged, which is also what real backends do and
//! what keeps the local-write → snapshot → local-write echo finite.

use super::{DocStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use syncro_marshal::WireDoc;
use tokio::sync::mpsc;
use tracing::debug;

type DocKey = (String, String);

/// An in-memory [`DocStore`] with snapshot broadcast per document.
#[derive(Default)]
pub struct MemoryDocStore {
    docs: RwLock<HashMap<DocKey, WireDoc>>,
    watchers: Mutex<HashMap<DocKey, Vec<mpsc::UnboundedSender<WireDoc>>>>,
    /// Fault injection: number of upcoming `get` calls that fail.
    failing_gets: AtomicU32,
}

impl MemoryDocStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `get` fail with a backend error.
    /// Used by tests to drive the mount retry loop.
    pub fn fail_next_gets(&self, count: u32) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    /// Deletes a document without notifying watchers, as if the backend
    /// lost it. Used by tests to drive the not-found recovery loop.
    pub fn vanish(&self, collection: &str, doc_id: &str) {
        self.docs
            .write()
            .unwrap()
            .remove(&key(collection, doc_id));
    }

    /// Inserts a document directly, bypassing notification. Test seeding.
    pub fn seed(&self, collection: &str, doc_id: &str, doc: WireDoc) {
        self.docs.write().unwrap().insert(key(collection, doc_id), doc);
    }

    fn notify(&self, doc_key: &DocKey, doc: &WireDoc) {
        let mut watchers = self.watchers.lock().unwrap();
        if let Some(senders) = watchers.get_mut(doc_key) {
            senders.retain(|sender| sender.send(doc.clone()).is_ok());
        }
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn get(&self, collection: &str, doc_id: &str) -> Result<Option<WireDoc>, StoreError> {
        let remaining = self.failing_gets.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_gets.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("injected get failure".to_string()));
        }
        Ok(self.docs.read().unwrap().get(&key(collection, doc_id)).cloned())
    }

    async fn exists(&self, collection: &str, doc_id: &str) -> Result<bool, StoreError> {
        Ok(self.docs.read().unwrap().contains_key(&key(collection, doc_id)))
    }

    async fn set(&self, collection: &str, doc_id: &str, doc: WireDoc) -> Result<(), StoreError> {
        let doc_key = key(collection, doc_id);
        let changed = {
            let mut docs = self.docs.write().unwrap();
            let changed = docs.get(&doc_key) != Some(&doc);
            docs.insert(doc_key.clone(), doc.clone());
            changed
        };
        if changed {
            debug!(collection, doc_id, "document replaced");
            self.notify(&doc_key, &doc);
        }
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        doc_id: &str,
        patch: WireDoc,
    ) -> Result<(), StoreError> {
        let doc_key = key(collection, doc_id);
        let updated = {
            let mut docs = self.docs.write().unwrap();
            let Some(doc) = docs.get_mut(&doc_key) else {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    doc_id: doc_id.to_string(),
                });
            };
            let mut changed = false;
            for (k, v) in patch {
                if doc.get(&k) != Some(&v) {
                    doc.insert(k, v);
                    changed = true;
                }
            }
            changed.then(|| doc.clone())
        };
        if let Some(doc) = updated {
            debug!(collection, doc_id, "document merged");
            self.notify(&doc_key, &doc);
        }
        Ok(())
    }

    async fn remove(&self, collection: &str, doc_id: &str) -> Result<(), StoreError> {
        self.docs.write().unwrap().remove(&key(collection, doc_id));
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<WireDoc>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.watchers
            .lock()
            .unwrap()
            .entry(key(collection, doc_id))
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

fn key(collection: &str, doc_id: &str) -> DocKey {
    (collection.to_string(), doc_id.to_string())
}
