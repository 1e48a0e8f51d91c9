//! Debounced write queue.
//!
//! Local mutations arrive from the adapter watcher as full state
//! snapshots. A burst of them inside one throttle window collapses into a
//! single commit of the last snapshot — per-key last-value-wins, since
//! each snapshot already carries the newest value of every key.

use std::future::Future;
use std::time::Duration;
use syncro_marshal::StateMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The queue half handed to the adapter watcher plus its drain task.
pub(crate) struct DebouncedWriter {
    tx: mpsc::UnboundedSender<StateMap>,
    handle: JoinHandle<()>,
}

impl DebouncedWriter {
    /// Spawns the drain task. `commit` runs once per throttle window with
    /// the last snapshot submitted during that window.
    pub(crate) fn spawn<F, Fut>(window: Duration, mut commit: F) -> Self
    where
        F: FnMut(StateMap) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<StateMap>();
        let handle = tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut pending = first;
                let deadline = tokio::time::sleep(window);
                tokio::pin!(deadline);
                loop {
                    tokio::select! {
                        () = &mut deadline => break,
                        next = rx.recv() => match next {
                            Some(state) => pending = state,
                            None => break,
                        },
                    }
                }
                commit(pending).await;
            }
        });
        Self { tx, handle }
    }

    /// A detached submit handle for the adapter watcher.
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<StateMap> {
        self.tx.clone()
    }

    /// Stops the drain task, dropping any pending snapshot.
    pub(crate) fn shutdown(&self) {
        self.handle.abort();
    }
}
