//! Identifier types used throughout the Syncro core.
//!
//! Uses UUID v4 for session identifiers; a session names one process
//! instance, not a piece of data, so time-ordering buys nothing here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use uuid::Uuid;

static CURRENT_SESSION: OnceLock<SessionId> = OnceLock::new();

/// Identifies this process to the registry service.
///
/// Every replica's heartbeat carries the same session id so the registry
/// can correlate liveness across all replicas mounted by one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a fresh random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the process-wide session ID, generating it on first use.
    ///
    /// Replicas receive this at construction rather than reading it from a
    /// static, so tests can substitute their own session via [`SessionId::new`].
    #[must_use]
    pub fn current() -> Self {
        *CURRENT_SESSION.get_or_init(Self::new)
    }

    /// Creates a session ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a session ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
