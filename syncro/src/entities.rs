//! Entity registry.
//!
//! An entity is a named category of durable data (project, namespace,
//! citation library) with its own initialization and flush rules. The
//! registry maps the plural entity name appearing in session paths to the
//! handler that knows how to pull canonical data out of the durable store
//! and push flushed state back in.
//!
//! `init_state` runs exactly once per replica mount, and only when the
//! bound document is empty. `flush_state` is invoked by the external
//! registry service — never by the replica itself.

use crate::durable::DurableStore;
use crate::error::{SyncroError, SyncroResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use syncro_marshal::StateMap;
use syncro_types::SessionPath;
use tracing::debug;

/// Everything a handler needs to initialize or flush one replica.
pub struct EntityContext {
    /// Query access to the durable store.
    pub durable: Arc<dyn DurableStore>,
    /// The replica's path coordinates.
    pub path: SessionPath,
    /// Current replica state; present on flush, absent on init.
    pub state: Option<StateMap>,
}

/// Per-entity initialization and flush rules. Stateless.
#[async_trait]
pub trait EntityHandler: Send + Sync {
    /// The singular form of the entity name, e.g. `project`.
    fn singular(&self) -> &str;

    /// Produces the state seeding an empty replica document.
    async fn init_state(&self, ctx: &EntityContext) -> SyncroResult<StateMap>;

    /// Pushes `ctx.state` back to the durable store, merging rather than
    /// overwriting unless the entity's semantics require otherwise.
    async fn flush_state(&self, ctx: &EntityContext) -> SyncroResult<()>;
}

impl std::fmt::Debug for dyn EntityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandler")
            .field("singular", &self.singular())
            .finish()
    }
}

/// Lookup table from plural entity name to handler.
#[derive(Default)]
pub struct EntityRegistry {
    entries: HashMap<String, Arc<dyn EntityHandler>>,
}

impl EntityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its plural entity name.
    pub fn register(&mut self, entity: impl Into<String>, handler: Arc<dyn EntityHandler>) {
        self.entries.insert(entity.into(), handler);
    }

    /// Whether an entity name is registered.
    #[must_use]
    pub fn contains(&self, entity: &str) -> bool {
        self.entries.contains_key(entity)
    }

    /// Resolves an entity name to its handler.
    ///
    /// An unknown name is a fatal, non-retried error.
    pub fn resolve(&self, entity: &str) -> SyncroResult<Arc<dyn EntityHandler>> {
        self.entries
            .get(entity)
            .cloned()
            .ok_or_else(|| SyncroError::UnknownEntity(entity.to_string()))
    }
}

/// Generic row-backed handler: initializes from the row at
/// `(storage_collection, id)` and flushes by merging state back into it.
///
/// The reference implementation of the handler contract; entities with
/// richer semantics supply their own.
pub struct TableEntity {
    singular: String,
}

impl TableEntity {
    /// Creates a handler with the given singular name.
    pub fn new(singular: impl Into<String>) -> Self {
        Self {
            singular: singular.into(),
        }
    }
}

#[async_trait]
impl EntityHandler for TableEntity {
    fn singular(&self) -> &str {
        &self.singular
    }

    async fn init_state(&self, ctx: &EntityContext) -> SyncroResult<StateMap> {
        let row = ctx
            .durable
            .fetch(ctx.path.storage_collection(), ctx.path.id)
            .await?;
        match row {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(SyncroError::Invariant(format!(
                "durable row {}/{} is not an object: {other}",
                ctx.path.storage_collection(),
                ctx.path.id
            ))),
            None => {
                // A freshly created entity has nothing to seed yet.
                debug!(path = %ctx.path, "no durable row; seeding empty state");
                Ok(StateMap::new())
            }
        }
    }

    async fn flush_state(&self, ctx: &EntityContext) -> SyncroResult<()> {
        let state = ctx.state.clone().ok_or_else(|| {
            SyncroError::Invariant("flush_state called without state".to_string())
        })?;
        ctx.durable
            .merge(
                ctx.path.storage_collection(),
                ctx.path.id,
                Value::Object(state),
            )
            .await?;
        debug!(path = %ctx.path, "state flushed to durable store");
        Ok(())
    }
}
