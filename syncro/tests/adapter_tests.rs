use serde_json::json;
use std::sync::{Arc, Mutex};
use syncro::{PlainAdapter, ReactiveAdapter, StateMap};

fn state(pairs: &[(&str, serde_json::Value)]) -> StateMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ── State access ──────────────────────────────────────────────────

#[test]
fn get_state_snapshots_initial() {
    let adapter = PlainAdapter::new(state(&[("a", json!(1))]));
    assert_eq!(adapter.get_state(), state(&[("a", json!(1))]));
}

#[test]
fn set_state_merges() {
    let adapter = PlainAdapter::new(state(&[("a", json!(1)), ("b", json!(2))]));
    adapter.set_state(state(&[("b", json!(20)), ("c", json!(3))]));

    let now = adapter.get_state();
    assert_eq!(now.get("a"), Some(&json!(1)));
    assert_eq!(now.get("b"), Some(&json!(20)));
    assert_eq!(now.get("c"), Some(&json!(3)));
}

#[test]
fn doc_is_the_live_document() {
    let adapter = PlainAdapter::new(state(&[("a", json!(1))]));
    let doc = adapter.doc();
    adapter.set_state(state(&[("b", json!(2))]));
    assert_eq!(doc.read().unwrap().len(), 2);
}

// ── Watching ──────────────────────────────────────────────────────

#[test]
fn watcher_fires_on_change() {
    let adapter = PlainAdapter::new(StateMap::new());
    let seen: Arc<Mutex<Vec<StateMap>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    adapter
        .watch(Box::new(move |snapshot| sink.lock().unwrap().push(snapshot)))
        .unwrap();

    adapter.set_state(state(&[("a", json!(1))]));
    let calls = seen.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].get("a"), Some(&json!(1)));
}

#[test]
fn watcher_skips_identical_writes() {
    let adapter = PlainAdapter::new(state(&[("a", json!(1))]));
    let count = Arc::new(Mutex::new(0usize));
    let sink = count.clone();
    adapter
        .watch(Box::new(move |_| *sink.lock().unwrap() += 1))
        .unwrap();

    adapter.set_state(state(&[("a", json!(1))]));
    assert_eq!(*count.lock().unwrap(), 0);

    adapter.set_state(state(&[("a", json!(2))]));
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn second_watcher_is_refused() {
    let adapter = PlainAdapter::new(StateMap::new());
    adapter.watch(Box::new(|_| {})).unwrap();
    assert!(adapter.watch(Box::new(|_| {})).is_err());
}

// ── Factory ───────────────────────────────────────────────────────

#[test]
fn factory_builds_over_initial_state() {
    let factory = PlainAdapter::factory();
    let adapter = factory(state(&[("a", json!(1))])).unwrap();
    assert_eq!(adapter.get_state(), state(&[("a", json!(1))]));
}
