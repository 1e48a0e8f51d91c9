//! Single-replica controller.
//!
//! A [`Syncro`] owns one real-time document: it binds the document on
//! mount, seeds it from the durable store when empty, propagates remote
//! snapshots into the caller's reactive adapter, captures local changes
//! through a debounced writer, reports liveness/dirtiness through the
//! heartbeat, and tears everything down on destroy.

use crate::adapter::{AdapterFactory, PlainAdapter, ReactiveAdapter};
use crate::config::SyncroConfig;
use crate::durable::DurableStore;
use crate::entities::{EntityContext, EntityRegistry};
use crate::error::{SyncroError, SyncroResult};
use crate::heartbeat::Heartbeat;
use crate::registry::RegistryClient;
use crate::store::{DocStore, StoreError};
use crate::throttle::DebouncedWriter;
use futures::future::{join_all, BoxFuture};
use rand::Rng;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncro_marshal::{Marshaller, StateMap, WireDoc};
use syncro_types::{PathOptions, SessionId, SessionPath};
use tracing::{debug, info, warn};

/// How many times a not-found write asks the registry to reinitialize
/// before the error propagates.
const MAX_WRITE_RECOVERIES: u32 = 3;

/// Replica lifecycle states. There is no way back out of `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unmounted,
    Mounting,
    Mounted,
    Destroyed,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unmounted => "unmounted",
            Self::Mounting => "mounting",
            Self::Mounted => "mounted",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Options for [`Syncro::mount`].
#[derive(Clone)]
pub struct MountOptions {
    /// Seed written (replace semantics) when the bound document is empty,
    /// instead of asking the entity handler for its canonical state.
    pub initial_state: Option<StateMap>,
    /// Builds the reactive adapter over the decoded initial state.
    /// Defaults to [`PlainAdapter::factory`].
    pub adapter: Option<AdapterFactory>,
    /// Mount attempts before giving up.
    pub retries: u32,
    /// First retry backoff; later retries triple it, with jitter.
    pub retry_min_time_ms: u64,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            initial_state: None,
            adapter: None,
            retries: 5,
            retry_min_time_ms: 250,
        }
    }
}

/// Options for [`Syncro::set`].
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// Apply only keys whose value actually differs.
    pub delta: bool,
    /// Request a registry flush after a change was applied.
    pub flush: bool,
    /// Request the flush even when nothing differed.
    pub force_flush: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            delta: true,
            flush: true,
            force_flush: false,
        }
    }
}

/// Options for [`Syncro::flush`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushOptions {
    /// Ask the registry to dispose of the replica after flushing.
    pub destroy: bool,
}

type DestroyAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Controller for one floating replica.
pub struct Syncro {
    path: SessionPath,
    config: SyncroConfig,
    session: SessionId,
    store: Arc<dyn DocStore>,
    durable: Arc<dyn DurableStore>,
    entities: Arc<EntityRegistry>,
    registry: RegistryClient,
    marshaller: Arc<Marshaller>,
    lifecycle: Mutex<Lifecycle>,
    adapter: Mutex<Option<Arc<dyn ReactiveAdapter>>>,
    dirty: Arc<AtomicBool>,
    heartbeat: Heartbeat,
    destroy_actions: Mutex<Vec<DestroyAction>>,
}

impl Syncro {
    /// Creates an unmounted replica for the given path.
    pub fn new(
        path: &str,
        store: Arc<dyn DocStore>,
        durable: Arc<dyn DurableStore>,
        entities: Arc<EntityRegistry>,
        config: SyncroConfig,
    ) -> SyncroResult<Self> {
        let path = SessionPath::parse(path, &PathOptions::default())?;
        Self::from_path(path, store, durable, entities, config)
    }

    pub(crate) fn from_path(
        path: SessionPath,
        store: Arc<dyn DocStore>,
        durable: Arc<dyn DurableStore>,
        entities: Arc<EntityRegistry>,
        config: SyncroConfig,
    ) -> SyncroResult<Self> {
        let registry = RegistryClient::new(&config)?;
        Ok(Self {
            path,
            config,
            session: SessionId::current(),
            store,
            durable,
            entities,
            registry,
            marshaller: Arc::new(Marshaller::new()),
            lifecycle: Mutex::new(Lifecycle::Unmounted),
            adapter: Mutex::new(None),
            dirty: Arc::new(AtomicBool::new(false)),
            heartbeat: Heartbeat::new(),
            destroy_actions: Mutex::new(Vec::new()),
        })
    }

    /// Substitutes the session id used by heartbeats. Tests mostly.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// The replica's path.
    pub fn path(&self) -> &SessionPath {
        &self.path
    }

    /// The session id this replica heartbeats under.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    /// Whether the replica is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.lifecycle() == Lifecycle::Mounted
    }

    /// Whether unflushed local changes exist since the last delivered
    /// heartbeat.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Marks the replica dirty for the next heartbeat.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// A snapshot of the replica's current state.
    pub fn state(&self) -> SyncroResult<StateMap> {
        Ok(self.require_adapter()?.get_state())
    }

    // ── Mount ────────────────────────────────────────────────────

    /// Binds the backing document and brings the replica live.
    ///
    /// Failures destroy the partial mount and retry the whole sequence
    /// under randomized exponential backoff; the last error is wrapped in
    /// [`SyncroError::MountExhausted`].
    pub async fn mount(&self, options: MountOptions) -> SyncroResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            match *lifecycle {
                Lifecycle::Unmounted => *lifecycle = Lifecycle::Mounting,
                state => {
                    return Err(SyncroError::Lifecycle(format!("cannot mount from {state}")))
                }
            }
        }

        // Unknown entities are fatal before the first attempt; the retry
        // loop is for transient failures only.
        if let Err(err) = self.entities.resolve(&self.path.entity) {
            *self.lifecycle.lock().unwrap() = Lifecycle::Unmounted;
            return Err(err);
        }

        let retries = options.retries.max(1);
        let min_backoff = Duration::from_millis(options.retry_min_time_ms);
        let mut attempt: u32 = 0;
        loop {
            match self.mount_once(&options).await {
                Ok(()) => {
                    *self.lifecycle.lock().unwrap() = Lifecycle::Mounted;
                    info!(path = %self.path, "replica mounted");
                    return Ok(());
                }
                Err(err) => {
                    attempt += 1;
                    self.teardown().await;
                    if attempt >= retries {
                        *self.lifecycle.lock().unwrap() = Lifecycle::Unmounted;
                        return Err(SyncroError::MountExhausted {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                    let backoff = mount_backoff(min_backoff, attempt);
                    warn!(
                        path = %self.path,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "mount attempt failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn mount_once(&self, options: &MountOptions) -> SyncroResult<()> {
        let collection = self.path.storage_collection().to_string();
        let doc_id = self.path.storage_doc_id();

        // A previous attempt's heartbeat must not outlive it.
        self.heartbeat.disable();

        // Bind and read the backing document.
        let wire = self.store.get(&collection, &doc_id).await?;
        let state = self.marshaller.from_wire(wire.as_ref());

        let factory = options.adapter.clone().unwrap_or_else(PlainAdapter::factory);
        let adapter =
            factory(state).map_err(|e| SyncroError::AdapterContract(e.to_string()))?;
        *self.adapter.lock().unwrap() = Some(adapter.clone());

        // Remote snapshots flow into the adapter, merge-style: keys absent
        // from a snapshot are kept.
        let mut snapshots = self.store.subscribe(&collection, &doc_id).await?;
        let remote_adapter = adapter.clone();
        let remote_marshaller = self.marshaller.clone();
        let remote_path = self.path.clone();
        let subscription = tokio::spawn(async move {
            while let Some(snapshot) = snapshots.recv().await {
                let decoded = remote_marshaller.from_wire(Some(&snapshot));
                debug!(path = %remote_path, keys = decoded.len(), "remote snapshot applied");
                remote_adapter.set_state(decoded);
            }
        });
        self.push_destroy_action(Box::new(move || {
            Box::pin(async move {
                subscription.abort();
            })
        }));

        // Seed an empty document, caller-supplied state first.
        let doc_is_empty = wire.as_ref().is_none_or(WireDoc::is_empty);
        if doc_is_empty {
            let seed = match &options.initial_state {
                Some(initial) => initial.clone(),
                None => {
                    let handler = self.entities.resolve(&self.path.entity)?;
                    let ctx = EntityContext {
                        durable: self.durable.clone(),
                        path: self.path.clone(),
                        state: None,
                    };
                    handler.init_state(&ctx).await?
                }
            };
            adapter.set_state(seed.clone());
            self.store
                .set(&collection, &doc_id, self.marshaller.to_wire(&seed))
                .await?;
            info!(path = %self.path, keys = seed.len(), "replica seeded");
        }

        // Debounced local writer: mark dirty, push merge, recover from a
        // vanished document.
        let writer = {
            let store = self.store.clone();
            let registry = self.registry.clone();
            let marshaller = self.marshaller.clone();
            let path = self.path.clone();
            let dirty = self.dirty.clone();
            DebouncedWriter::spawn(self.config.write_throttle(), move |state: StateMap| {
                let store = store.clone();
                let registry = registry.clone();
                let marshaller = marshaller.clone();
                let path = path.clone();
                let dirty = dirty.clone();
                async move {
                    dirty.store(true, Ordering::SeqCst);
                    let patch = marshaller.to_wire(&state);
                    if let Err(error) =
                        write_merge_recovering(&*store, &registry, &path, patch).await
                    {
                        // No caller to reject here; the dirty flag stays
                        // set so the registry still learns about it.
                        warn!(path = %path, %error, "local write failed");
                    }
                }
            })
        };
        let sender = writer.sender();
        adapter
            .watch(Box::new(move |state| {
                let _ = sender.send(state);
            }))
            .map_err(|e| SyncroError::AdapterContract(e.to_string()))?;
        self.push_destroy_action(Box::new(move || {
            Box::pin(async move {
                writer.shutdown();
            })
        }));

        // Heartbeat, immediate first pulse. Dirtiness is only cleared by a
        // pulse that actually delivered.
        let registry = self.registry.clone();
        let path = self.path.clone();
        let session = self.session;
        let dirty = self.dirty.clone();
        self.heartbeat
            .enable(self.config.heartbeat_interval(), move || {
                let registry = registry.clone();
                let path = path.clone();
                let dirty = dirty.clone();
                async move {
                    let was_dirty = dirty.swap(false, Ordering::SeqCst);
                    if let Err(error) = registry.heartbeat(&path, session, was_dirty).await {
                        warn!(path = %path, %error, "heartbeat failed");
                        if was_dirty {
                            dirty.store(true, Ordering::SeqCst);
                        }
                    }
                }
            });

        Ok(())
    }

    // ── Live operations ──────────────────────────────────────────

    /// Merges a patch into the replica's live value.
    ///
    /// With `delta`, keys whose value already matches are dropped; when
    /// nothing remains the flush step is skipped unless `force_flush`.
    pub async fn set(&self, patch: StateMap, options: &SetOptions) -> SyncroResult<()> {
        let adapter = self.require_mounted()?;
        let changed: StateMap = if options.delta {
            let current = adapter.get_state();
            patch
                .into_iter()
                .filter(|(key, value)| current.get(key) != Some(value))
                .collect()
        } else {
            patch
        };

        if !changed.is_empty() {
            debug!(path = %self.path, keys = changed.len(), "local set applied");
            adapter.set_state(changed);
        } else if !options.force_flush {
            return Ok(());
        }

        if options.flush {
            self.flush(&FlushOptions::default()).await?;
        }
        Ok(())
    }

    /// Sets a single key with default options.
    pub async fn set_key(&self, key: impl Into<String>, value: Value) -> SyncroResult<()> {
        let mut patch = StateMap::new();
        patch.insert(key.into(), value);
        self.set(patch, &SetOptions::default()).await
    }

    /// Asks the registry service to flush this path server-side.
    ///
    /// The registry invokes the entity's `flush_state`; the replica never
    /// does that itself.
    pub async fn flush(&self, options: &FlushOptions) -> SyncroResult<()> {
        self.require_mounted()?;
        self.registry.flush(&self.path, options.destroy).await
    }

    /// Removes a top-level key from the live value and pushes the removal
    /// with replace semantics (a merge cannot delete).
    pub async fn remove_key(&self, key: &str) -> SyncroResult<bool> {
        let adapter = self.require_mounted()?;
        let snapshot = {
            let doc = adapter.doc();
            let mut state = doc.write().unwrap();
            if state.remove(key).is_none() {
                return Ok(false);
            }
            state.clone()
        };
        self.mark_dirty();
        self.store
            .set(
                self.path.storage_collection(),
                &self.path.storage_doc_id(),
                self.marshaller.to_wire(&snapshot),
            )
            .await?;
        Ok(true)
    }

    /// Tears the replica down: unsubscribes, stops timers, clears the
    /// value. Idempotent; runs all recorded destroy actions concurrently.
    pub async fn destroy(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle == Lifecycle::Destroyed {
                return;
            }
            *lifecycle = Lifecycle::Destroyed;
        }
        self.teardown().await;
        info!(path = %self.path, "replica destroyed");
    }

    async fn teardown(&self) {
        self.heartbeat.disable();
        let actions: Vec<DestroyAction> =
            std::mem::take(&mut *self.destroy_actions.lock().unwrap());
        join_all(actions.into_iter().map(|action| action())).await;
        *self.adapter.lock().unwrap() = None;
    }

    // ── One-off access ───────────────────────────────────────────

    /// Reads a path's current state without mounting a replica.
    pub async fn read_once(
        store: &dyn DocStore,
        entities: &EntityRegistry,
        path: &str,
    ) -> SyncroResult<StateMap> {
        let path = SessionPath::parse(path, &PathOptions::default())?;
        entities.resolve(&path.entity)?;
        let marshaller = Marshaller::new();
        let wire = store
            .get(path.storage_collection(), &path.storage_doc_id())
            .await?;
        Ok(marshaller.from_wire(wire.as_ref()))
    }

    /// Merges a patch into a path's backing document without mounting,
    /// creating the document when absent.
    pub async fn write_once(
        store: &dyn DocStore,
        entities: &EntityRegistry,
        path: &str,
        patch: StateMap,
    ) -> SyncroResult<()> {
        let path = SessionPath::parse(path, &PathOptions::default())?;
        entities.resolve(&path.entity)?;
        let marshaller = Marshaller::new();
        let collection = path.storage_collection();
        let doc_id = path.storage_doc_id();
        let wire = marshaller.to_wire(&patch);
        match store.update(collection, &doc_id, wire.clone()).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound { .. }) => {
                store.set(collection, &doc_id, wire).await.map_err(Into::into)
            }
            Err(err) => Err(err.into()),
        }
    }

    // ── Internals ────────────────────────────────────────────────

    pub(crate) fn key_len(&self) -> usize {
        self.adapter
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |adapter| adapter.doc().read().unwrap().len())
    }

    pub(crate) fn get_value(&self, key: &str) -> Option<Value> {
        self.adapter
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|adapter| adapter.doc().read().unwrap().get(key).cloned())
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.adapter
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|adapter| adapter.doc().read().unwrap().contains_key(key))
    }

    pub(crate) fn state_keys(&self) -> Vec<String> {
        self.adapter
            .lock()
            .unwrap()
            .as_ref()
            .map_or_else(Vec::new, |adapter| {
                adapter.doc().read().unwrap().keys().cloned().collect()
            })
    }

    fn require_mounted(&self) -> SyncroResult<Arc<dyn ReactiveAdapter>> {
        let lifecycle = self.lifecycle();
        if lifecycle != Lifecycle::Mounted {
            return Err(SyncroError::Lifecycle(format!(
                "replica is {lifecycle}, not mounted"
            )));
        }
        self.require_adapter()
    }

    fn require_adapter(&self) -> SyncroResult<Arc<dyn ReactiveAdapter>> {
        self.adapter
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncroError::Lifecycle("no adapter bound".to_string()))
    }

    fn push_destroy_action(&self, action: DestroyAction) {
        self.destroy_actions.lock().unwrap().push(action);
    }
}

/// Merge-writes a patch, recovering from a vanished backing document by
/// asking the registry to reinitialize the path, a bounded number of times.
pub(crate) async fn write_merge_recovering(
    store: &dyn DocStore,
    registry: &RegistryClient,
    path: &SessionPath,
    patch: WireDoc,
) -> SyncroResult<()> {
    let collection = path.storage_collection();
    let doc_id = path.storage_doc_id();
    let mut recoveries = 0;
    loop {
        match store.update(collection, &doc_id, patch.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                let err = SyncroError::from(err);
                if !err.is_not_found() || recoveries >= MAX_WRITE_RECOVERIES {
                    return Err(err);
                }
                recoveries += 1;
                warn!(
                    path = %path,
                    recoveries,
                    "backing document missing; asking registry to reinitialize"
                );
                registry.reinitialize(path).await?;
            }
        }
    }
}

fn mount_backoff(min: Duration, attempt: u32) -> Duration {
    let base = min.as_millis() as f64 * 3f64.powi(attempt as i32 - 1);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((base * jitter) as u64)
}
