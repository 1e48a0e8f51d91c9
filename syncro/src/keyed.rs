//! Sharded replica controller.
//!
//! Very large keyed collections do not fit one real-time document, so a
//! [`SyncroKeyed`] shards one logical keyed map across an ordered,
//! contiguous list of member replicas, each capped at `max_keys` top-level
//! keys. Discovery probes member indices upward from zero instead of
//! listing, membership never has gaps, and every key lives in exactly one
//! member. [`KeyedView`] is the map-like façade over the union.

use crate::config::SyncroConfig;
use crate::durable::DurableStore;
use crate::entities::{EntityContext, EntityRegistry};
use crate::error::{SyncroError, SyncroResult};
use crate::replica::{FlushOptions, Lifecycle, MountOptions, SetOptions, Syncro};
use crate::store::DocStore;
use futures::future::join_all;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use syncro_marshal::StateMap;
use syncro_types::{PathOptions, SessionId, SessionPath};
use tracing::{debug, info};

/// Controller for one logical keyed map sharded across member replicas.
pub struct SyncroKeyed {
    template: SessionPath,
    config: SyncroConfig,
    session: SessionId,
    store: Arc<dyn DocStore>,
    durable: Arc<dyn DurableStore>,
    entities: Arc<EntityRegistry>,
    lifecycle: Mutex<Lifecycle>,
    members: tokio::sync::RwLock<Vec<Arc<Syncro>>>,
}

impl std::fmt::Debug for SyncroKeyed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncroKeyed")
            .field("template", &self.template)
            .field("config", &self.config)
            .field("session", &self.session)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl SyncroKeyed {
    /// Creates an unmounted sharded replica.
    ///
    /// The path must carry exactly one shard wildcard, e.g.
    /// `projects::<uuid>::entries-*`.
    pub fn new(
        path: &str,
        store: Arc<dyn DocStore>,
        durable: Arc<dyn DurableStore>,
        entities: Arc<EntityRegistry>,
        config: SyncroConfig,
    ) -> SyncroResult<Self> {
        let template = SessionPath::parse(
            path,
            &PathOptions {
                allow_wildcard: true,
            },
        )?;
        if !template.has_wildcard() {
            return Err(SyncroError::InvalidPath(
                syncro_types::PathError::MissingWildcard(template.to_string()),
            ));
        }
        Ok(Self {
            template,
            config,
            session: SessionId::current(),
            store,
            durable,
            entities,
            lifecycle: Mutex::new(Lifecycle::Unmounted),
            members: tokio::sync::RwLock::new(Vec::new()),
        })
    }

    /// Substitutes the session id used by member heartbeats. Tests mostly.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = session;
        self
    }

    /// The wildcard path this sharded replica was built from.
    pub fn path(&self) -> &SessionPath {
        &self.template
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap()
    }

    /// Number of member replicas.
    pub async fn member_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// One member replica, by shard index.
    pub async fn member(&self, index: usize) -> Option<Arc<Syncro>> {
        self.members.read().await.get(index).cloned()
    }

    /// The map-like façade over the union of all members.
    pub fn view(&self) -> KeyedView<'_> {
        KeyedView { keyed: self }
    }

    // ── Mount ────────────────────────────────────────────────────

    /// Discovers existing members by probing, or bootstraps member 0 and
    /// distributes the entity's canonical state.
    pub async fn mount(&self) -> SyncroResult<()> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            match *lifecycle {
                Lifecycle::Unmounted => *lifecycle = Lifecycle::Mounting,
                state => {
                    return Err(SyncroError::Lifecycle(format!("cannot mount from {state}")))
                }
            }
        }
        match self.mount_inner().await {
            Ok(()) => {
                *self.lifecycle.lock().unwrap() = Lifecycle::Mounted;
                let members = self.members.read().await.len();
                info!(path = %self.template, members, "keyed replica mounted");
                Ok(())
            }
            Err(err) => {
                let members = std::mem::take(&mut *self.members.write().await);
                join_all(members.iter().map(|member| member.destroy())).await;
                *self.lifecycle.lock().unwrap() = Lifecycle::Unmounted;
                Err(err)
            }
        }
    }

    async fn mount_inner(&self) -> SyncroResult<()> {
        self.entities.resolve(&self.template.entity)?;

        // Discovery by probing: members are contiguous, so the first
        // absent index ends the scan.
        let mut index = 0;
        loop {
            let member_path = self.template.shard_path(index)?;
            let exists = self
                .store
                .exists(member_path.storage_collection(), &member_path.storage_doc_id())
                .await?;
            if !exists {
                break;
            }
            debug!(path = %member_path, index, "discovered keyed member");
            self.keyed_members_expand(Some(index)).await?;
            index += 1;
        }

        if self.members.read().await.is_empty() {
            // Member 0 starts from a forced empty object so the normal
            // populate-from-empty path cannot race the assignment below.
            self.keyed_members_expand(None).await?;
            let handler = self.entities.resolve(&self.template.entity)?;
            let ctx = EntityContext {
                durable: self.durable.clone(),
                path: self.template.clone(),
                state: None,
            };
            let seed = handler.init_state(&ctx).await?;
            self.keyed_assign(seed).await?;
        }
        Ok(())
    }

    // ── Key distribution ─────────────────────────────────────────

    /// Distributes a whole state across members.
    ///
    /// Fast path (exactly one member holding zero keys): chunk the entries
    /// in iteration order and bulk-assign chunk *i* to member *i*. Slow
    /// path: apply entries one by one via [`keyed_set`](Self::keyed_set),
    /// preserving existing occupancy.
    pub async fn keyed_assign(&self, state: StateMap) -> SyncroResult<()> {
        self.ensure_live()?;
        let fast = {
            let members = self.members.read().await;
            members.len() == 1 && members[0].key_len() == 0
        };
        if !fast {
            for (key, value) in state {
                self.keyed_set(key, value).await?;
            }
            return Ok(());
        }

        let entries: Vec<(String, Value)> = state.into_iter().collect();
        let chunk_size = self.config.max_keys.max(1);
        for (index, chunk) in entries.chunks(chunk_size).enumerate() {
            let existing = {
                let members = self.members.read().await;
                members.get(index).cloned()
            };
            let member = match existing {
                Some(member) => member,
                None => self.keyed_members_expand(None).await?,
            };
            let bulk: StateMap = chunk.iter().cloned().collect();
            member
                .set(
                    bulk,
                    &SetOptions {
                        delta: false,
                        flush: false,
                        force_flush: false,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Sets one key somewhere in the member list.
    ///
    /// The owning member wins when the key already lives somewhere (a key
    /// lives in exactly one member); otherwise the first member with spare
    /// capacity takes it, expanding by one member when all are full.
    pub async fn keyed_set(&self, key: impl Into<String>, value: Value) -> SyncroResult<()> {
        let key = key.into();
        self.ensure_live()?;

        let (owner, spare) = {
            let members = self.members.read().await;
            let owner = members.iter().find(|m| m.contains_key(&key)).cloned();
            let spare = members
                .iter()
                .find(|m| m.key_len() < self.config.max_keys)
                .cloned();
            (owner, spare)
        };

        if let Some(member) = owner.or(spare) {
            return member.set(single(key, value), &member_write()).await;
        }

        let member = self.keyed_members_expand(None).await?;
        if member.key_len() >= self.config.max_keys {
            // Should be unreachable; fail loudly rather than lose the key.
            return Err(SyncroError::Invariant(format!(
                "freshly expanded member already holds {} keys (max {})",
                member.key_len(),
                self.config.max_keys
            )));
        }
        member.set(single(key, value), &member_write()).await
    }

    /// Ensures a member exists (and is mounted) at the given index,
    /// appending at the end when no index is given.
    ///
    /// An index that already has a member is a no-op beyond the mount
    /// guarantee, which makes discovery races idempotent.
    pub async fn keyed_members_expand(&self, index: Option<usize>) -> SyncroResult<Arc<Syncro>> {
        self.ensure_live()?;
        let mut members = self.members.write().await;
        let target = index.unwrap_or(members.len());

        if target < members.len() {
            let member = members[target].clone();
            drop(members);
            if !member.is_mounted() {
                member.mount(member_mount()).await?;
            }
            return Ok(member);
        }

        let member_path = self.template.shard_path(target)?;
        debug!(path = %member_path, index = target, "expanding keyed member");
        let member = Arc::new(
            Syncro::from_path(
                member_path,
                self.store.clone(),
                self.durable.clone(),
                self.entities.clone(),
                self.config.clone(),
            )?
            .with_session(self.session),
        );
        member.mount(member_mount()).await?;
        let position = target.min(members.len());
        members.insert(position, member.clone());
        Ok(member)
    }

    // ── Flush / destroy ──────────────────────────────────────────

    /// Fans a registry flush out to every member in parallel. With
    /// `destroy`, members flush first and the whole sharded replica is
    /// destroyed afterwards.
    pub async fn flush(&self, options: &FlushOptions) -> SyncroResult<()> {
        self.ensure_live()?;
        let members = self.members.read().await.clone();
        let results = join_all(members.iter().map(|member| member.flush(options))).await;
        for result in results {
            result?;
        }
        if options.destroy {
            self.destroy().await;
        }
        Ok(())
    }

    /// Destroys every member in parallel. Idempotent.
    pub async fn destroy(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap();
            if *lifecycle == Lifecycle::Destroyed {
                return;
            }
            *lifecycle = Lifecycle::Destroyed;
        }
        let members = std::mem::take(&mut *self.members.write().await);
        join_all(members.iter().map(|member| member.destroy())).await;
        info!(path = %self.template, "keyed replica destroyed");
    }

    fn ensure_live(&self) -> SyncroResult<()> {
        let lifecycle = *self.lifecycle.lock().unwrap();
        if lifecycle == Lifecycle::Destroyed {
            return Err(SyncroError::Lifecycle(
                "keyed replica is destroyed".to_string(),
            ));
        }
        Ok(())
    }
}

/// Map-like façade over the union of every member's keys.
///
/// Lookup scans members in order for the first one owning the key;
/// assignment routes to the owner or falls through to
/// [`SyncroKeyed::keyed_set`]; removal of a key no member owns is a
/// silent no-op.
pub struct KeyedView<'a> {
    keyed: &'a SyncroKeyed,
}

impl KeyedView<'_> {
    /// The flattened union of every member's keys, in member order.
    pub async fn keys(&self) -> Vec<String> {
        let members = self.keyed.members.read().await;
        members.iter().flat_map(|m| m.state_keys()).collect()
    }

    /// Total number of keys across members.
    pub async fn len(&self) -> usize {
        let members = self.keyed.members.read().await;
        members.iter().map(|m| m.key_len()).sum()
    }

    /// Whether no member holds any key.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The value of a key, from its owning member.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let members = self.keyed.members.read().await;
        members.iter().find_map(|m| m.get_value(key))
    }

    /// Whether any member owns the key.
    pub async fn contains(&self, key: &str) -> bool {
        let members = self.keyed.members.read().await;
        members.iter().any(|m| m.contains_key(key))
    }

    /// Sets a key, routing to its owning member or appending per
    /// [`SyncroKeyed::keyed_set`].
    pub async fn set(&self, key: impl Into<String>, value: Value) -> SyncroResult<()> {
        self.keyed.keyed_set(key, value).await
    }

    /// Removes a key from its owning member. Returns `false` — without
    /// error — when no member owns it.
    pub async fn remove(&self, key: &str) -> SyncroResult<bool> {
        let owner = {
            let members = self.keyed.members.read().await;
            members.iter().find(|m| m.contains_key(key)).cloned()
        };
        match owner {
            Some(member) => member.remove_key(key).await,
            None => Ok(false),
        }
    }
}

fn single(key: String, value: Value) -> StateMap {
    let mut map = StateMap::new();
    map.insert(key, value);
    map
}

fn member_mount() -> MountOptions {
    MountOptions {
        initial_state: Some(StateMap::new()),
        ..Default::default()
    }
}

fn member_write() -> SetOptions {
    // Member writes ride the debounced writer; the registry flush is the
    // keyed replica's explicit, fan-out operation.
    SetOptions {
        delta: true,
        flush: false,
        force_flush: false,
    }
}
