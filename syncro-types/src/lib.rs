//! Core type definitions for Syncro.
//!
//! This crate defines the engine-agnostic value types shared by every
//! replica controller:
//! - The process session identifier used for heartbeat liveness correlation
//! - The session-path grammar (`entity::uuid[::relation]`) and its derived
//!   storage coordinates
//!
//! Entity semantics, stores, and controllers live in the `syncro` crate;
//! nothing here performs I/O.

mod ids;
mod path;

pub use ids::SessionId;
pub use path::{PathError, PathOptions, SessionPath};
