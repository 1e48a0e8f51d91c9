//! Floating-replica engine.
//!
//! Holds durably-stored entities (projects, namespaces, citation
//! libraries) as "floating" locally-mutable replicas backed by a real-time
//! document store. Replicas are cheap to read and write many times per
//! second; an external registry service eventually flushes them back to
//! the durable store and garbage-collects the ones that stop heartbeating.
//!
//! # Components
//!
//! - **Stores**: trait seams for the two backends — the real-time
//!   document store ([`DocStore`]) and the durable relational store
//!   ([`DurableStore`]) — with in-memory implementations for tests.
//! - **Entities**: per-entity initialization/flush handlers looked up by
//!   name ([`EntityRegistry`]).
//! - **Registry client**: the HTTP client for the external lifecycle
//!   service (reinitialize / heartbeat / flush).
//! - **Replica controller** ([`Syncro`]): one real-time document's
//!   mount/heartbeat/flush/destroy lifecycle, local-change capture, and
//!   remote-change propagation.
//! - **Sharded controller** ([`SyncroKeyed`]): one logical keyed map
//!   transparently sharded across many member replicas, with a map-like
//!   [`KeyedView`] over the union.
//!
//! # Replica lifecycle
//!
//! 1. **Mount**: bind the backing document, seed it from the durable
//!    store when empty, subscribe to remote changes, start the debounced
//!    local writer and the heartbeat.
//! 2. **Live**: local mutations flow caller → marshaller → store
//!    (throttled); remote mutations flow store → marshaller → reactive
//!    adapter. Conflicts resolve last-local-write-wins; the registry
//!    service reconciles on flush.
//! 3. **Destroy**: unsubscribe, stop timers, clear the local value. The
//!    registry service notices the missing heartbeat and cleans up.

mod adapter;
mod config;
mod durable;
mod entities;
mod error;
mod heartbeat;
mod keyed;
mod registry;
mod replica;
mod store;
mod throttle;

pub use adapter::{
    AdapterError, AdapterFactory, PlainAdapter, ReactiveAdapter, SharedState, WatchCallback,
};
pub use config::SyncroConfig;
pub use durable::{DurableError, DurableStore, MemoryDurableStore};
pub use entities::{EntityContext, EntityHandler, EntityRegistry, TableEntity};
pub use error::{SyncroError, SyncroResult};
pub use keyed::{KeyedView, SyncroKeyed};
pub use registry::RegistryClient;
pub use replica::{FlushOptions, Lifecycle, MountOptions, SetOptions, Syncro};
pub use store::{DocStore, MemoryDocStore, StoreError};

pub use syncro_marshal::{Marshaller, StateMap, WireDoc};
pub use syncro_types::{PathError, PathOptions, SessionId, SessionPath};
