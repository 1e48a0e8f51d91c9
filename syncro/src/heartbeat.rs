//! Heartbeat task.
//!
//! A cancellable repeating task: pulse immediately on enable, then sleep
//! the interval and pulse again while the enabled flag still holds. The
//! flag is checked before each reschedule, so disabling takes effect at
//! the next wakeup even if the abort races.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Running {
    enabled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// A restartable heartbeat slot owned by one replica.
#[derive(Default)]
pub(crate) struct Heartbeat {
    inner: Mutex<Option<Running>>,
}

impl Heartbeat {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts pulsing, replacing any previous run. The first pulse fires
    /// immediately.
    pub(crate) fn enable<F, Fut>(&self, interval: Duration, mut pulse: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.disable();
        let enabled = Arc::new(AtomicBool::new(true));
        let flag = enabled.clone();
        let handle = tokio::spawn(async move {
            loop {
                pulse().await;
                tokio::time::sleep(interval).await;
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
            }
        });
        *self.inner.lock().unwrap() = Some(Running { enabled, handle });
    }

    /// Stops pulsing. Idempotent; a no-op when never enabled.
    pub(crate) fn disable(&self) {
        if let Some(running) = self.inner.lock().unwrap().take() {
            running.enabled.store(false, Ordering::SeqCst);
            running.handle.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.disable();
    }
}
