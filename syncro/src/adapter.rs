//! Reactive adapter contract.
//!
//! The replica never touches a concrete UI framework; it drives whatever
//! reactive layer the caller supplies through this capability interface.
//! An adapter exposes the live document handle, snapshot reads, merge
//! writes, and local-change watching. [`PlainAdapter`] is the
//! framework-free implementation used by sharded members and tests.

use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use syncro_marshal::StateMap;
use thiserror::Error;

/// The live document shared between the adapter and its owner.
pub type SharedState = Arc<RwLock<StateMap>>;

/// Local-change notification callback; receives the full new state.
pub type WatchCallback = Box<dyn Fn(StateMap) + Send + Sync>;

/// An adapter that cannot satisfy the contract reports why.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

/// Builds an adapter over the decoded initial state, once per mount.
pub type AdapterFactory =
    Arc<dyn Fn(StateMap) -> Result<Arc<dyn ReactiveAdapter>, AdapterError> + Send + Sync>;

/// Capability interface over the caller's reactive layer.
///
/// The four operations the mount contract requires. Three are guaranteed
/// by the trait itself; `watch` is the dynamic one — an adapter that
/// cannot register the watcher (or already gave it away) fails there, and
/// the mount fails fast with an adapter-contract error.
pub trait ReactiveAdapter: Send + Sync {
    /// The live reactive document.
    fn doc(&self) -> SharedState;

    /// A snapshot of the current state.
    fn get_state(&self) -> StateMap;

    /// Merges a partial state in: present keys overwrite, absent keys stay.
    fn set_state(&self, partial: StateMap);

    /// Registers the local-change watcher. At most one; a second
    /// registration fails.
    fn watch(&self, callback: WatchCallback) -> Result<(), AdapterError>;
}

/// Plain shared-map adapter with no framework behind it.
pub struct PlainAdapter {
    state: SharedState,
    watcher: Mutex<Option<WatchCallback>>,
}

impl PlainAdapter {
    /// Creates an adapter owning the given initial state.
    #[must_use]
    pub fn new(initial: StateMap) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            watcher: Mutex::new(None),
        }
    }

    /// The factory form used as the default mount adapter.
    #[must_use]
    pub fn factory() -> AdapterFactory {
        Arc::new(|initial| Ok(Arc::new(PlainAdapter::new(initial)) as Arc<dyn ReactiveAdapter>))
    }

    /// Reads one value out of the live state.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.state.read().unwrap().get(key).cloned()
    }
}

impl ReactiveAdapter for PlainAdapter {
    fn doc(&self) -> SharedState {
        self.state.clone()
    }

    fn get_state(&self) -> StateMap {
        self.state.read().unwrap().clone()
    }

    fn set_state(&self, partial: StateMap) {
        let snapshot = {
            let mut state = self.state.write().unwrap();
            let mut changed = false;
            for (key, value) in partial {
                if state.get(&key) != Some(&value) {
                    state.insert(key, value);
                    changed = true;
                }
            }
            changed.then(|| state.clone())
        };
        // Watchers only hear about real changes; identical writes are
        // dropped here so a remote echo of our own write terminates.
        if let Some(snapshot) = snapshot {
            if let Some(watcher) = self.watcher.lock().unwrap().as_ref() {
                watcher(snapshot);
            }
        }
    }

    fn watch(&self, callback: WatchCallback) -> Result<(), AdapterError> {
        let mut watcher = self.watcher.lock().unwrap();
        if watcher.is_some() {
            return Err(AdapterError("watcher already registered".to_string()));
        }
        *watcher = Some(callback);
        Ok(())
    }
}
