//! Session path grammar.
//!
//! A session path names one replica-backed piece of durable data:
//! `entity::uuid` for a whole row, `entity::uuid::relation` for a keyed
//! sub-collection of it. The sharded controller uses a relation containing
//! a single `*`, substituted per member with a zero-based shard index.
//!
//! Parsing is pure and registry-free; whether `entity` names a registered
//! entity is checked separately by the engine, so the grammar stays
//! testable on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by session-path parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The input does not match `entity::uuid(::relation)?`.
    #[error("invalid session path `{0}`")]
    Malformed(String),

    /// The id segment is not a canonical UUID.
    #[error("invalid session path `{0}`: id is not a canonical UUID")]
    InvalidId(String),

    /// The relation segment contains characters outside the grammar.
    #[error("invalid session path `{0}`: bad relation segment")]
    InvalidRelation(String),

    /// A `*` appeared but wildcards were not allowed here.
    #[error("invalid session path `{0}`: wildcard not allowed")]
    WildcardNotAllowed(String),

    /// A sharded path was required but the input carries no `*`.
    #[error("session path `{0}` has no shard wildcard")]
    MissingWildcard(String),
}

/// Parse options for [`SessionPath::parse`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOptions {
    /// Permit a single `*` in the relation segment (sharded paths).
    pub allow_wildcard: bool,
}

/// Structured coordinates of one session path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionPath {
    /// Registered entity name (plural), e.g. `projects`.
    pub entity: String,
    /// Row id within the entity's table.
    pub id: Uuid,
    /// Optional sub-collection relation.
    pub relation: Option<String>,
}

impl SessionPath {
    /// Composes a path from its coordinates without validation.
    pub fn new(entity: impl Into<String>, id: Uuid, relation: Option<String>) -> Self {
        Self {
            entity: entity.into(),
            id,
            relation,
        }
    }

    /// Parses and validates `entity::uuid(::relation)?`.
    pub fn parse(input: &str, options: &PathOptions) -> Result<Self, PathError> {
        let segments: Vec<&str> = input.split("::").collect();
        let (entity, id, relation) = match segments.as_slice() {
            [entity, id] => (*entity, *id, None),
            [entity, id, relation] => (*entity, *id, Some(*relation)),
            _ => return Err(PathError::Malformed(input.to_string())),
        };

        if entity.is_empty() || !entity.chars().all(is_name_char) {
            return Err(PathError::Malformed(input.to_string()));
        }

        let id = parse_canonical_uuid(id).ok_or_else(|| PathError::InvalidId(input.to_string()))?;

        let relation = match relation {
            None => None,
            Some(rel) => {
                if rel.is_empty() || !rel.chars().all(|c| is_name_char(c) || c == '*') {
                    return Err(PathError::InvalidRelation(input.to_string()));
                }
                let wildcards = rel.matches('*').count();
                if wildcards > 0 && !options.allow_wildcard {
                    return Err(PathError::WildcardNotAllowed(input.to_string()));
                }
                if wildcards > 1 {
                    return Err(PathError::InvalidRelation(input.to_string()));
                }
                Some(rel.to_string())
            }
        };

        Ok(Self {
            entity: entity.to_string(),
            id,
            relation,
        })
    }

    /// The real-time store collection holding this path's documents.
    pub fn storage_collection(&self) -> &str {
        &self.entity
    }

    /// The document id within [`storage_collection`](Self::storage_collection).
    pub fn storage_doc_id(&self) -> String {
        match &self.relation {
            Some(relation) => format!("{}::{}", self.id, relation),
            None => self.id.to_string(),
        }
    }

    /// Whether the relation carries a shard wildcard.
    pub fn has_wildcard(&self) -> bool {
        self.relation.as_deref().is_some_and(|r| r.contains('*'))
    }

    /// Substitutes the shard wildcard with a member index.
    pub fn shard_path(&self, index: usize) -> Result<Self, PathError> {
        let relation = self
            .relation
            .as_deref()
            .filter(|r| r.contains('*'))
            .ok_or_else(|| PathError::MissingWildcard(self.to_string()))?;
        Ok(Self {
            entity: self.entity.clone(),
            id: self.id,
            relation: Some(relation.replacen('*', &index.to_string(), 1)),
        })
    }
}

impl fmt::Display for SessionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(relation) => write!(f, "{}::{}::{}", self.entity, self.id, relation),
            None => write!(f, "{}::{}", self.entity, self.id),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Accepts only the hyphenated 8-4-4-4-12 form, case-insensitively.
fn parse_canonical_uuid(s: &str) -> Option<Uuid> {
    if s.len() != 36 {
        return None;
    }
    let hyphens_ok = s
        .char_indices()
        .all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        });
    if !hyphens_ok {
        return None;
    }
    Uuid::parse_str(s).ok()
}
