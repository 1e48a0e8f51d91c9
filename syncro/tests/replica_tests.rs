use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use syncro::{
    DocStore, DurableStore, EntityRegistry, FlushOptions, Lifecycle, MemoryDocStore,
    MemoryDurableStore, MountOptions, SetOptions, StateMap, Syncro, SyncroConfig, SyncroError,
    TableEntity, WireDoc,
};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// A port nothing listens on; heartbeat failures there are swallowed.
const OFFLINE_REGISTRY: &str = "http://127.0.0.1:9";

struct Harness {
    store: Arc<MemoryDocStore>,
    durable: Arc<MemoryDurableStore>,
    entities: Arc<EntityRegistry>,
}

fn harness() -> Harness {
    let mut entities = EntityRegistry::new();
    entities.register("projects", Arc::new(TableEntity::new("project")));
    Harness {
        store: Arc::new(MemoryDocStore::new()),
        durable: Arc::new(MemoryDurableStore::new()),
        entities: Arc::new(entities),
    }
}

fn config(registry_url: &str) -> SyncroConfig {
    SyncroConfig {
        registry_url: registry_url.to_string(),
        heartbeat_interval_ms: 60_000,
        write_throttle_ms: 10,
        http_timeout_ms: 2_000,
        max_keys: 2,
    }
}

fn replica(h: &Harness, path: &str, registry_url: &str) -> Syncro {
    Syncro::new(
        path,
        h.store.clone(),
        h.durable.clone(),
        h.entities.clone(),
        config(registry_url),
    )
    .unwrap()
}

fn no_flush() -> SetOptions {
    SetOptions {
        delta: true,
        flush: false,
        force_flush: false,
    }
}

fn state(pairs: &[(&str, Value)]) -> StateMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn fast_retries() -> MountOptions {
    MountOptions {
        retry_min_time_ms: 1,
        ..Default::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Mount: seeding ────────────────────────────────────────────────

#[tokio::test]
async fn mount_seeds_from_the_durable_row() {
    let h = harness();
    let id = Uuid::new_v4();
    h.durable
        .replace("projects", id, json!({"title": "thesis"}))
        .await
        .unwrap();

    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();

    assert_eq!(syncro.lifecycle(), Lifecycle::Mounted);
    assert_eq!(syncro.state().unwrap().get("title"), Some(&json!("thesis")));
    // seeded with replace semantics into the backing document
    let doc = h.store.get("projects", &id.to_string()).await.unwrap().unwrap();
    assert_eq!(doc.get("title"), Some(&json!("thesis")));
}

#[tokio::test]
async fn mount_prefers_caller_supplied_initial_state() {
    let h = harness();
    let id = Uuid::new_v4();
    h.durable
        .replace("projects", id, json!({"title": "ignored"}))
        .await
        .unwrap();

    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro
        .mount(MountOptions {
            initial_state: Some(state(&[("fresh", json!(true))])),
            ..Default::default()
        })
        .await
        .unwrap();

    let now = syncro.state().unwrap();
    assert_eq!(now.get("fresh"), Some(&json!(true)));
    assert!(now.get("title").is_none());
}

#[tokio::test]
async fn mount_skips_init_when_the_doc_is_nonempty() {
    let h = harness();
    let id = Uuid::new_v4();
    h.durable
        .replace("projects", id, json!({"title": "from-durable"}))
        .await
        .unwrap();
    let mut doc = WireDoc::new();
    doc.insert("existing".to_string(), json!(1));
    h.store.seed("projects", &id.to_string(), doc);

    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();

    let now = syncro.state().unwrap();
    assert_eq!(now.get("existing"), Some(&json!(1)));
    assert!(now.get("title").is_none());
}

#[tokio::test]
async fn mount_unknown_entity_fails_without_retrying() {
    let h = harness();
    let syncro = replica(&h, &format!("ghosts::{}", Uuid::new_v4()), OFFLINE_REGISTRY);
    let err = syncro.mount(fast_retries()).await.unwrap_err();
    assert!(matches!(err, SyncroError::UnknownEntity(_)));
    assert_eq!(syncro.lifecycle(), Lifecycle::Unmounted);
}

#[tokio::test]
async fn mount_twice_is_a_lifecycle_error() {
    let h = harness();
    let syncro = replica(&h, &format!("projects::{}", Uuid::new_v4()), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();
    let err = syncro.mount(MountOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncroError::Lifecycle(_)));
}

// ── Mount: retries ────────────────────────────────────────────────

#[tokio::test]
async fn mount_retries_through_transient_failures() {
    let h = harness();
    h.store.fail_next_gets(2);

    let syncro = replica(&h, &format!("projects::{}", Uuid::new_v4()), OFFLINE_REGISTRY);
    syncro.mount(fast_retries()).await.unwrap();
    assert!(syncro.is_mounted());
}

#[tokio::test]
async fn mount_exhausts_after_the_last_retry() {
    let h = harness();
    h.store.fail_next_gets(100);

    let syncro = replica(&h, &format!("projects::{}", Uuid::new_v4()), OFFLINE_REGISTRY);
    let err = syncro
        .mount(MountOptions {
            retries: 3,
            retry_min_time_ms: 1,
            ..Default::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncroError::MountExhausted { attempts: 3, .. }
    ));
    assert_eq!(syncro.lifecycle(), Lifecycle::Unmounted);
}

#[tokio::test]
async fn an_exhausted_replica_can_mount_again() {
    let h = harness();
    h.store.fail_next_gets(100);
    let syncro = replica(&h, &format!("projects::{}", Uuid::new_v4()), OFFLINE_REGISTRY);
    let _ = syncro
        .mount(MountOptions {
            retries: 2,
            retry_min_time_ms: 1,
            ..Default::default()
        })
        .await;

    h.store.fail_next_gets(0);
    syncro.mount(MountOptions::default()).await.unwrap();
    assert!(syncro.is_mounted());
}

// ── Local writes ──────────────────────────────────────────────────

#[tokio::test]
async fn set_applies_and_reaches_the_store() {
    let h = harness();
    let id = Uuid::new_v4();
    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();

    syncro.set(state(&[("a", json!(1))]), &no_flush()).await.unwrap();
    settle().await;

    assert!(syncro.is_dirty());
    let doc = h.store.get("projects", &id.to_string()).await.unwrap().unwrap();
    assert_eq!(doc.get("a"), Some(&json!(1)));
}

#[tokio::test]
async fn delta_set_drops_unchanged_keys() {
    let h = harness();
    let id = Uuid::new_v4();
    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro
        .mount(MountOptions {
            initial_state: Some(state(&[("a", json!(1))])),
            ..Default::default()
        })
        .await
        .unwrap();

    syncro.set(state(&[("a", json!(1))]), &no_flush()).await.unwrap();
    settle().await;

    // nothing differed: no write, no dirtiness
    assert!(!syncro.is_dirty());
}

#[tokio::test]
async fn writes_in_one_throttle_window_collapse() {
    let h = harness();
    let id = Uuid::new_v4();
    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();

    let mut snapshots = h.store.subscribe("projects", &id.to_string()).await.unwrap();

    syncro.set(state(&[("a", json!(1))]), &no_flush()).await.unwrap();
    syncro.set(state(&[("a", json!(2))]), &no_flush()).await.unwrap();
    syncro.set(state(&[("b", json!(3))]), &no_flush()).await.unwrap();
    settle().await;

    // one outbound merge for the whole burst, last value per key
    let snapshot = snapshots.try_recv().unwrap();
    assert_eq!(snapshot.get("a"), Some(&json!(2)));
    assert_eq!(snapshot.get("b"), Some(&json!(3)));
    assert!(snapshots.try_recv().is_err());
}

#[tokio::test]
async fn set_before_mount_is_a_lifecycle_error() {
    let h = harness();
    let syncro = replica(&h, &format!("projects::{}", Uuid::new_v4()), OFFLINE_REGISTRY);
    let err = syncro.set(state(&[("a", json!(1))]), &no_flush()).await.unwrap_err();
    assert!(matches!(err, SyncroError::Lifecycle(_)));
}

// ── Remote changes ────────────────────────────────────────────────

#[tokio::test]
async fn remote_snapshots_merge_into_the_adapter() {
    let h = harness();
    let id = Uuid::new_v4();
    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro
        .mount(MountOptions {
            initial_state: Some(state(&[("a", json!(1))])),
            ..Default::default()
        })
        .await
        .unwrap();

    // remote replace drops "a" from the doc; the local merge keeps it
    let mut doc = WireDoc::new();
    doc.insert("b".to_string(), json!(2));
    h.store.set("projects", &id.to_string(), doc).await.unwrap();
    settle().await;

    let now = syncro.state().unwrap();
    assert_eq!(now.get("a"), Some(&json!(1)));
    assert_eq!(now.get("b"), Some(&json!(2)));
}

// ── Heartbeat ─────────────────────────────────────────────────────

fn heartbeat_bodies(requests: &[Request], heartbeat_path: &str) -> Vec<Value> {
    requests
        .iter()
        .filter(|r| r.url.path() == heartbeat_path)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn heartbeat_reports_dirty_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness();
    let id = Uuid::new_v4();
    let mut cfg = config(&server.uri());
    cfg.heartbeat_interval_ms = 60;
    let syncro = Syncro::new(
        &format!("projects::{id}"),
        h.store.clone(),
        h.durable.clone(),
        h.entities.clone(),
        cfg,
    )
    .unwrap();

    syncro.mount(MountOptions::default()).await.unwrap();
    // default options: the set also requests a registry flush
    syncro.set_key("a", json!(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(160)).await;
    syncro.destroy().await;

    let requests = server.received_requests().await.unwrap();
    let bodies = heartbeat_bodies(&requests, &format!("/projects::{id}/heartbeat"));
    assert!(bodies.len() >= 3, "expected at least 3 pulses, got {}", bodies.len());
    // immediate pulse is clean, the one after the write is dirty, then clean again
    assert!(bodies[0].get("dirty").is_none());
    assert_eq!(bodies[1]["dirty"], json!(true));
    assert!(bodies[2].get("dirty").is_none());
}

#[tokio::test]
async fn undelivered_heartbeats_keep_the_dirty_flag() {
    let h = harness();
    let id = Uuid::new_v4();
    let mut cfg = config(OFFLINE_REGISTRY);
    cfg.heartbeat_interval_ms = 40;
    let syncro = Syncro::new(
        &format!("projects::{id}"),
        h.store.clone(),
        h.durable.clone(),
        h.entities.clone(),
        cfg,
    )
    .unwrap();

    syncro.mount(MountOptions::default()).await.unwrap();
    syncro.set(state(&[("a", json!(1))]), &no_flush()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(110)).await;

    // pulses fired and failed; dirtiness survives until one delivers
    assert!(syncro.is_dirty());
    syncro.destroy().await;
}

// ── Not-found recovery ────────────────────────────────────────────

struct Revive {
    store: Arc<MemoryDocStore>,
    collection: String,
    doc_id: String,
}

impl wiremock::Respond for Revive {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let mut doc = WireDoc::new();
        doc.insert("revived".to_string(), json!(true));
        self.store.seed(&self.collection, &self.doc_id, doc);
        ResponseTemplate::new(200)
    }
}

#[tokio::test]
async fn vanished_documents_recover_through_reinitialize() {
    let server = MockServer::start().await;
    let h = harness();
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path(format!("/projects::{id}")))
        .respond_with(Revive {
            store: h.store.clone(),
            collection: "projects".to_string(),
            doc_id: id.to_string(),
        })
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let syncro = Syncro::new(
        &format!("projects::{id}"),
        h.store.clone(),
        h.durable.clone(),
        h.entities.clone(),
        config(&server.uri()),
    )
    .unwrap();
    syncro.mount(MountOptions::default()).await.unwrap();

    h.store.vanish("projects", &id.to_string());
    syncro.set(state(&[("k", json!(7))]), &no_flush()).await.unwrap();
    settle().await;

    let doc = h.store.get("projects", &id.to_string()).await.unwrap().unwrap();
    assert_eq!(doc.get("k"), Some(&json!(7)));
    assert_eq!(doc.get("revived"), Some(&json!(true)));

    let reinits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == format!("/projects::{id}") && r.method.as_str() == "GET")
        .count();
    assert_eq!(reinits, 1);
}

#[tokio::test]
async fn recovery_gives_up_after_three_attempts() {
    let server = MockServer::start().await;
    let h = harness();
    let id = Uuid::new_v4();

    // the registry answers but never actually revives the document
    Mock::given(method("GET"))
        .and(path(format!("/projects::{id}")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let syncro = Syncro::new(
        &format!("projects::{id}"),
        h.store.clone(),
        h.durable.clone(),
        h.entities.clone(),
        config(&server.uri()),
    )
    .unwrap();
    syncro.mount(MountOptions::default()).await.unwrap();

    h.store.vanish("projects", &id.to_string());
    syncro.set(state(&[("k", json!(7))]), &no_flush()).await.unwrap();
    settle().await;

    assert!(h.store.get("projects", &id.to_string()).await.unwrap().is_none());
    let reinits = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == format!("/projects::{id}") && r.method.as_str() == "GET")
        .count();
    assert_eq!(reinits, 3);
}

// ── Flush ─────────────────────────────────────────────────────────

#[tokio::test]
async fn flush_asks_the_registry() {
    let server = MockServer::start().await;
    let h = harness();
    let id = Uuid::new_v4();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/projects::{id}/flush")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let syncro = Syncro::new(
        &format!("projects::{id}"),
        h.store.clone(),
        h.durable.clone(),
        h.entities.clone(),
        config(&server.uri()),
    )
    .unwrap();
    syncro.mount(MountOptions::default()).await.unwrap();
    syncro.flush(&FlushOptions::default()).await.unwrap();
}

// ── Destroy ───────────────────────────────────────────────────────

#[tokio::test]
async fn destroy_is_idempotent_and_final() {
    let h = harness();
    let id = Uuid::new_v4();
    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();

    syncro.destroy().await;
    syncro.destroy().await;
    assert_eq!(syncro.lifecycle(), Lifecycle::Destroyed);

    let err = syncro.set(state(&[("a", json!(1))]), &no_flush()).await.unwrap_err();
    assert!(matches!(err, SyncroError::Lifecycle(_)));
    let err = syncro.mount(MountOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncroError::Lifecycle(_)));
}

#[tokio::test]
async fn destroyed_replicas_ignore_remote_changes() {
    let h = harness();
    let id = Uuid::new_v4();
    let syncro = replica(&h, &format!("projects::{id}"), OFFLINE_REGISTRY);
    syncro.mount(MountOptions::default()).await.unwrap();
    syncro.destroy().await;

    let mut doc = WireDoc::new();
    doc.insert("late".to_string(), json!(1));
    h.store.set("projects", &id.to_string(), doc).await.unwrap();
    settle().await;

    // the value was cleared with the subscription
    assert!(matches!(syncro.state(), Err(SyncroError::Lifecycle(_))));
}

// ── One-off access ────────────────────────────────────────────────

#[tokio::test]
async fn write_once_then_read_once() {
    let h = harness();
    let id = Uuid::new_v4();
    let path = format!("projects::{id}");

    Syncro::write_once(&*h.store, &h.entities, &path, state(&[("a", json!(1))]))
        .await
        .unwrap();
    Syncro::write_once(&*h.store, &h.entities, &path, state(&[("b", json!(2))]))
        .await
        .unwrap();

    let read = Syncro::read_once(&*h.store, &h.entities, &path).await.unwrap();
    assert_eq!(read.get("a"), Some(&json!(1)));
    assert_eq!(read.get("b"), Some(&json!(2)));
}

#[tokio::test]
async fn read_once_of_a_missing_doc_is_empty() {
    let h = harness();
    let path = format!("projects::{}", Uuid::new_v4());
    let read = Syncro::read_once(&*h.store, &h.entities, &path).await.unwrap();
    assert!(read.is_empty());
}

#[tokio::test]
async fn one_off_access_checks_the_entity() {
    let h = harness();
    let path = format!("ghosts::{}", Uuid::new_v4());
    let err = Syncro::read_once(&*h.store, &h.entities, &path).await.unwrap_err();
    assert!(matches!(err, SyncroError::UnknownEntity(_)));
}
