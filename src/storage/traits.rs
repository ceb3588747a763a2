//! Abstract storage traits.
//!
//! The canonical store and the mention ledger are separate contracts: the
//! first holds the merged view, the second the append-only history it is
//! derived from. Backends implement both; the engine only sees the traits.

use thiserror::Error;

use crate::entity::CanonicalEntity;
use crate::fact::Fact;
use crate::kind::EntityKind;
use crate::ledger::{MentionRecord, RunId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An entity was written to the table of another kind.
    #[error("Kind mismatch for '{key}': table is {expected}, entity is {found}")]
    KindMismatch {
        key: String,
        expected: EntityKind,
        found: EntityKind,
    },

    /// A canonical key was empty.
    #[error("Canonical key cannot be empty")]
    EmptyKey,

    /// Backend error (I/O, poisoned locks).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored data failed an integrity check.
    #[error("Corrupted store: {0}")]
    Corrupted(String),

    /// Another process holds the store.
    #[error("Store is locked: {0}")]
    Locked(String),
}

impl StorageError {
    pub(crate) fn backend(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Backend(format!("{context}: {err}"))
    }
}

/// Keyed table of canonical entities, one table per kind.
///
/// There is no delete: entities are only created or updated.
pub trait CanonicalStore: Send + Sync {
    /// Get an entity by kind and canonical key.
    fn get(&self, kind: EntityKind, canonical_key: &str) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Insert or replace the entity stored under its key.
    fn upsert(&self, kind: EntityKind, entity: CanonicalEntity) -> Result<(), StorageError>;

    /// All entities of a kind, ordered by canonical key.
    fn list(&self, kind: EntityKind) -> Result<Vec<CanonicalEntity>, StorageError>;

    /// Number of entities of a kind.
    fn count(&self, kind: EntityKind) -> Result<usize, StorageError> {
        Ok(self.list(kind)?.len())
    }
}

/// Append-only mention history.
pub trait MentionLedger: Send + Sync {
    /// Appends one row and returns the sequence assigned to it.
    fn record(&self, mention: MentionRecord) -> Result<u64, StorageError>;

    /// Builds and appends the row for `fact` resolved to `canonical_key`.
    fn record_fact(&self, canonical_key: &str, fact: &Fact, run_id: RunId) -> Result<u64, StorageError> {
        self.record(MentionRecord::from_fact(canonical_key, fact, run_id))
    }

    /// All rows of a kind, in sequence order.
    fn mentions(&self, kind: EntityKind) -> Result<Vec<MentionRecord>, StorageError>;

    /// Rows for one entity, in sequence order.
    fn mentions_for(&self, kind: EntityKind, canonical_key: &str) -> Result<Vec<MentionRecord>, StorageError> {
        Ok(self
            .mentions(kind)?
            .into_iter()
            .filter(|m| m.canonical_key == canonical_key)
            .collect())
    }

    /// Total rows across all kinds.
    fn len(&self) -> Result<usize, StorageError>;

    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Shared checks applied by every backend before an upsert.
pub(crate) fn check_upsert(kind: EntityKind, entity: &CanonicalEntity) -> Result<(), StorageError> {
    if entity.canonical_key.trim().is_empty() {
        return Err(StorageError::EmptyKey);
    }
    if entity.kind != kind {
        return Err(StorageError::KindMismatch {
            key: entity.canonical_key.clone(),
            expected: kind,
            found: entity.kind,
        });
    }
    Ok(())
}
