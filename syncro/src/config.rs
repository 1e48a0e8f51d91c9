//! Configuration for replica controllers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by [`Syncro`](crate::Syncro) and
/// [`SyncroKeyed`](crate::SyncroKeyed) instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncroConfig {
    /// Base URL of the registry service.
    pub registry_url: String,
    /// How often the heartbeat reports liveness (ms).
    pub heartbeat_interval_ms: u64,
    /// Throttle window collapsing bursts of local writes (ms).
    pub write_throttle_ms: u64,
    /// Timeout applied to every registry HTTP call (ms).
    pub http_timeout_ms: u64,
    /// Maximum top-level keys per sharded member document.
    /// Deliberately small so sharding is exercised in tests.
    pub max_keys: usize,
}

impl Default for SyncroConfig {
    fn default() -> Self {
        Self {
            registry_url: "http://localhost:8080/syncro".to_string(),
            heartbeat_interval_ms: 15_000,
            write_throttle_ms: 250,
            http_timeout_ms: 10_000,
            max_keys: 2,
        }
    }
}

impl SyncroConfig {
    pub(crate) fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub(crate) fn write_throttle(&self) -> Duration {
        Duration::from_millis(self.write_throttle_ms)
    }

    pub(crate) fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
