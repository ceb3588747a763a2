//! In-memory storage backend.
//!
//! Thread-safe implementations of the storage traits, used for tests and for
//! one-shot runs that export without keeping a store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::entity::CanonicalEntity;
use crate::kind::EntityKind;
use crate::ledger::MentionRecord;
use crate::storage::traits::{check_upsert, CanonicalStore, MentionLedger, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Canonical tables keyed by kind, then by canonical key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalIndex {
    pub tables: BTreeMap<EntityKind, BTreeMap<String, CanonicalEntity>>,
}

impl CanonicalIndex {
    pub fn get(&self, kind: EntityKind, key: &str) -> Option<&CanonicalEntity> {
        self.tables.get(&kind)?.get(key)
    }

    pub fn upsert(&mut self, entity: CanonicalEntity) {
        self.tables
            .entry(entity.kind)
            .or_default()
            .insert(entity.canonical_key.clone(), entity);
    }

    pub fn list(&self, kind: EntityKind) -> Vec<CanonicalEntity> {
        self.tables
            .get(&kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.tables.get(&kind).map_or(0, BTreeMap::len)
    }

    pub fn total(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }
}

/// Ledger rows in append order plus a per-kind position index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<MentionRecord>", into = "Vec<MentionRecord>")]
pub struct LedgerIndex {
    rows: Vec<MentionRecord>,
    by_kind: HashMap<EntityKind, Vec<usize>>,
    last_sequence: u64,
}

impl LedgerIndex {
    /// Appends a row, assigning the next sequence unless it already has one
    /// (rows replayed from disk keep theirs).
    pub fn append(&mut self, mut mention: MentionRecord) -> u64 {
        if mention.sequence == 0 {
            mention.sequence = self.last_sequence + 1;
        }
        self.last_sequence = self.last_sequence.max(mention.sequence);
        let sequence = mention.sequence;
        self.by_kind
            .entry(mention.kind)
            .or_default()
            .push(self.rows.len());
        self.rows.push(mention);
        sequence
    }

    pub const fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    pub fn of_kind(&self, kind: EntityKind) -> Vec<MentionRecord> {
        self.by_kind
            .get(&kind)
            .map(|positions| positions.iter().map(|&i| self.rows[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<Vec<MentionRecord>> for LedgerIndex {
    fn from(rows: Vec<MentionRecord>) -> Self {
        let mut index = Self::default();
        for row in rows {
            index.append(row);
        }
        index
    }
}

impl From<LedgerIndex> for Vec<MentionRecord> {
    fn from(index: LedgerIndex) -> Self {
        index.rows
    }
}

/// Thread-safe in-memory canonical store.
#[derive(Debug, Default)]
pub struct InMemoryCanonicalStore {
    index: RwLock<CanonicalIndex>,
}

impl InMemoryCanonicalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanonicalStore for InMemoryCanonicalStore {
    fn get(&self, kind: EntityKind, canonical_key: &str) -> Result<Option<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("canonical.get"))?;
        Ok(index.get(kind, canonical_key).cloned())
    }

    fn upsert(&self, kind: EntityKind, entity: CanonicalEntity) -> Result<(), StorageError> {
        check_upsert(kind, &entity)?;
        let mut index = self.index.write().map_err(|_| lock_err("canonical.upsert"))?;
        index.upsert(entity);
        Ok(())
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("canonical.list"))?;
        Ok(index.list(kind))
    }

    fn count(&self, kind: EntityKind) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("canonical.count"))?;
        Ok(index.count(kind))
    }
}

/// Thread-safe in-memory mention ledger.
#[derive(Debug, Default)]
pub struct InMemoryMentionLedger {
    index: RwLock<LedgerIndex>,
}

impl InMemoryMentionLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MentionLedger for InMemoryMentionLedger {
    fn record(&self, mention: MentionRecord) -> Result<u64, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("ledger.record"))?;
        let mut mention = mention;
        mention.sequence = 0;
        Ok(index.append(mention))
    }

    fn mentions(&self, kind: EntityKind) -> Result<Vec<MentionRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("ledger.mentions"))?;
        Ok(index.of_kind(kind))
    }

    fn len(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("ledger.len"))?;
        Ok(index.len())
    }
}
