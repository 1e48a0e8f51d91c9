//! Registry service HTTP client.
//!
//! The registry service owns the server side of the replica lifecycle: it
//! (re)initializes backing documents, receives heartbeats to track which
//! replicas are alive and dirty, invokes the entity's `flush_state`, and
//! garbage-collects replicas that stop heartbeating. The engine only ever
//! fires these three endpoints and interprets the HTTP status.

use crate::config::SyncroConfig;
use crate::error::{SyncroError, SyncroResult};
use reqwest::Client;
use serde::Serialize;
use syncro_types::{SessionId, SessionPath};
use tracing::debug;

#[derive(Debug, Serialize)]
struct HeartbeatPulse {
    session: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    dirty: Option<bool>,
}

/// HTTP client for the registry service.
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    http: Client,
}

impl RegistryClient {
    /// Creates a client for the configured registry, with the configured
    /// request timeout applied to every call.
    pub fn new(config: &SyncroConfig) -> SyncroResult<Self> {
        let http = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self {
            base_url: config.registry_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Asks the registry to force-(re)initialize the path's backing document.
    pub async fn reinitialize(&self, path: &SessionPath) -> SyncroResult<()> {
        let url = self.path_url(path, None);
        debug!(%url, "requesting reinitialize");
        self.fire(self.http.get(&url), &url).await
    }

    /// Reports liveness (and dirtiness, when set) for the path.
    pub async fn heartbeat(
        &self,
        path: &SessionPath,
        session: SessionId,
        dirty: bool,
    ) -> SyncroResult<()> {
        let url = self.path_url(path, Some("heartbeat"));
        let pulse = HeartbeatPulse {
            session,
            dirty: dirty.then_some(true),
        };
        self.fire(self.http.post(&url).json(&pulse), &url).await
    }

    /// Asks the registry to flush the path server-side, optionally
    /// disposing of the replica afterwards.
    pub async fn flush(&self, path: &SessionPath, destroy: bool) -> SyncroResult<()> {
        let mut url = self.path_url(path, Some("flush"));
        if destroy {
            url.push_str("?destroy=1");
        }
        debug!(%url, "requesting flush");
        self.fire(self.http.get(&url), &url).await
    }

    async fn fire(&self, request: reqwest::RequestBuilder, url: &str) -> SyncroResult<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncroError::Registry {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(())
    }

    fn path_url(&self, path: &SessionPath, action: Option<&str>) -> String {
        match action {
            Some(action) => format!("{}/{}/{}", self.base_url, path, action),
            None => format!("{}/{}", self.base_url, path),
        }
    }
}
