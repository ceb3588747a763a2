//! Persistent implementations of the storage traits.
//!
//! Both stores keep their full state in memory and share one write-ahead
//! log. Each upsert and each mention append is its own log entry, written
//! before the in-memory index changes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info};

use crate::entity::CanonicalEntity;
use crate::kind::EntityKind;
use crate::ledger::MentionRecord;
use crate::storage::memory::{lock_err, CanonicalIndex, LedgerIndex};
use crate::storage::traits::{check_upsert, CanonicalStore, MentionLedger, StorageError};

use super::file_lock::FileLock;
use super::segment::{SegmentData, SegmentManager};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "factfold.wal";
const SEGMENTS_DIR: &str = "segments";

/// An open store directory.
///
/// Holds the directory lock; `canonical` and `ledger` can be cloned out and
/// handed to an engine while this value stays alive.
pub struct PersistentStores {
    pub dir: PathBuf,
    _lock: FileLock,
    wal: Arc<WriteAheadLog>,
    segments: Mutex<SegmentManager>,
    config: PersistentConfig,
    pub canonical: Arc<PersistentCanonicalStore>,
    pub ledger: Arc<PersistentMentionLedger>,
}

impl std::fmt::Debug for PersistentStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStores")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentStores {
    /// Opens or creates a store: lock, load the snapshot, replay the log.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)
            .map_err(|e| StorageError::backend("failed to create store directory", e))?;

        let lock = FileLock::acquire(dir).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                StorageError::Locked(match FileLock::holder(dir) {
                    Some(pid) => format!("{} (held by pid {pid})", dir.display()),
                    None => dir.display().to_string(),
                })
            } else {
                StorageError::backend("failed to acquire lock", e)
            }
        })?;

        let wal = Arc::new(
            WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
                .map_err(|e| StorageError::Corrupted(format!("failed to open write-ahead log: {e}")))?,
        );
        let segments = SegmentManager::open(&dir.join(SEGMENTS_DIR))
            .map_err(|e| StorageError::backend("failed to open segments", e))?;

        let stores = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            canonical: Arc::new(PersistentCanonicalStore::new(Arc::clone(&wal))),
            ledger: Arc::new(PersistentMentionLedger::new(Arc::clone(&wal))),
            wal,
            segments: Mutex::new(segments),
            config,
        };
        stores.load_snapshot()?;
        stores.replay_wal()?;
        Ok(stores)
    }

    fn load_snapshot(&self) -> Result<(), StorageError> {
        let data = self
            .segments
            .lock()
            .map_err(|_| lock_err("segments.load"))?
            .load_latest()
            .map_err(|e| StorageError::Corrupted(format!("failed to load snapshot: {e}")))?;
        *self.canonical.index.write().map_err(|_| lock_err("canonical.load"))? = data.canonical;
        *self.ledger.index.write().map_err(|_| lock_err("ledger.load"))? = data.ledger;
        Ok(())
    }

    fn replay_wal(&self) -> Result<(), StorageError> {
        let iter = self
            .wal
            .iter()
            .map_err(|e| StorageError::backend("failed to read write-ahead log", e))?;
        let mut canonical = self.canonical.index.write().map_err(|_| lock_err("canonical.replay"))?;
        let mut ledger = self.ledger.index.write().map_err(|_| lock_err("ledger.replay"))?;
        // Rows at or below this sequence are already in the snapshot; a crash
        // between segment install and log truncation leaves them in both.
        let snapshot_last = ledger.next_sequence() - 1;

        let mut count = 0usize;
        let mut skipped = 0usize;
        for entry in iter {
            let entry = entry.map_err(|e| StorageError::Corrupted(format!("write-ahead log entry: {e}")))?;
            match entry.kind {
                WalEntryKind::EntityUpsert(entity) => canonical.upsert(entity),
                WalEntryKind::MentionAppend(mention) if mention.sequence <= snapshot_last => {
                    skipped += 1;
                }
                WalEntryKind::MentionAppend(mention) => {
                    ledger.append(mention);
                }
                WalEntryKind::Checkpoint { .. } => {}
            }
            count += 1;
        }
        if count > 0 {
            info!(entries = count, skipped, dir = %self.dir.display(), "replayed write-ahead log");
        }
        Ok(())
    }

    /// Writes the current state to a new snapshot segment and truncates the log.
    ///
    /// If this fails after the segment is written, the log still holds
    /// entries the snapshot covers; replay skips mentions the snapshot
    /// already has and re-applies upserts, which are idempotent.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let canonical = self.canonical.index.write().map_err(|_| lock_err("canonical.compact"))?;
        let ledger = self.ledger.index.write().map_err(|_| lock_err("ledger.compact"))?;

        let current_seq = self
            .wal
            .current_sequence()
            .map_err(|e| StorageError::backend("write-ahead log", e))?;
        let wal_size_before = self.wal_size();
        if current_seq == 0 {
            return Ok(CompactionResult {
                entries_compacted: 0,
                segment_path: None,
                wal_size_before,
                wal_size_after: wal_size_before,
            });
        }

        let data = SegmentData {
            canonical: canonical.clone(),
            ledger: ledger.clone(),
        };
        let mut segments = self.segments.lock().map_err(|_| lock_err("segments.compact"))?;
        let mut writer = segments
            .create_segment_writer()
            .map_err(|e| StorageError::backend("failed to create segment writer", e))?;
        if let Err(e) = writer.write_data(&data) {
            let _ = writer.abort();
            return Err(StorageError::backend("failed to write segment", e));
        }
        let segment = writer
            .finalize()
            .map_err(|e| StorageError::backend("failed to finalize segment", e))?;
        let segment_path = segment.path().to_path_buf();

        self.wal
            .append(WalEntryKind::Checkpoint { up_to_sequence: current_seq })
            .map_err(|e| StorageError::backend("failed to write checkpoint", e))?;
        self.wal
            .truncate()
            .map_err(|e| StorageError::backend("failed to truncate write-ahead log", e))?;
        segments
            .install(segment)
            .map_err(|e| StorageError::backend("failed to prune old segments", e))?;

        let wal_size_after = self.wal_size();
        info!(
            entries = current_seq,
            segment = %segment_path.display(),
            wal_size_before,
            wal_size_after,
            "compacted store"
        );
        Ok(CompactionResult {
            entries_compacted: current_seq,
            segment_path: Some(segment_path),
            wal_size_before,
            wal_size_after,
        })
    }

    /// Compacts when the log has outgrown `max_wal_size`.
    pub fn compact_if_needed(&self) -> Result<Option<CompactionResult>, StorageError> {
        if self.wal_size() < self.config.max_wal_size {
            return Ok(None);
        }
        self.compact().map(Some)
    }

    /// Discards every entity and mention, on disk and in memory.
    pub fn reset(&self) -> Result<(), StorageError> {
        let mut canonical = self.canonical.index.write().map_err(|_| lock_err("canonical.reset"))?;
        let mut ledger = self.ledger.index.write().map_err(|_| lock_err("ledger.reset"))?;
        let mut segments = self.segments.lock().map_err(|_| lock_err("segments.reset"))?;

        self.wal
            .truncate()
            .map_err(|e| StorageError::backend("failed to truncate write-ahead log", e))?;
        segments
            .remove_all()
            .map_err(|e| StorageError::backend("failed to remove segments", e))?;
        *canonical = CanonicalIndex::default();
        *ledger = LedgerIndex::default();

        info!(dir = %self.dir.display(), "store reset");
        Ok(())
    }

    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.lock().map_or(0, |s| s.segments().len())
    }
}

/// Outcome of [`PersistentStores::compact`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompactionResult {
    pub entries_compacted: u64,
    pub segment_path: Option<PathBuf>,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

// --- Canonical store ---

#[derive(Debug)]
pub struct PersistentCanonicalStore {
    wal: Arc<WriteAheadLog>,
    index: RwLock<CanonicalIndex>,
}

impl PersistentCanonicalStore {
    fn new(wal: Arc<WriteAheadLog>) -> Self {
        Self {
            wal,
            index: RwLock::new(CanonicalIndex::default()),
        }
    }
}

impl CanonicalStore for PersistentCanonicalStore {
    fn get(&self, kind: EntityKind, canonical_key: &str) -> Result<Option<CanonicalEntity>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("canonical.get"))?;
        Ok(index.get(kind, canonical_key).cloned())
    }

    fn upsert(&self, kind: EntityKind, entity: CanonicalEntity) -> Result<(), StorageError> {
        check_upsert(kind, &entity)?;
        let mut index = self.index.write().map_err(|_| lock_err("canonical.upsert"))?;
        self.wal
            .append(WalEntryKind::EntityUpsert(entity.clone()))
            .map_err(|e| StorageError::backend("write-ahead log append", e))?;
        debug!(kind = %kind, canonical_key = %entity.canonical_key, "upserted entity");
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

// --- Mention ledger ---

#[derive(Debug)]
pub struct PersistentMentionLedger {
    wal: Arc<WriteAheadLog>,
    index: RwLock<LedgerIndex>,
}

impl PersistentMentionLedger {
    fn new(wal: Arc<WriteAheadLog>) -> Self {
        Self {
            wal,
            index: RwLock::new(LedgerIndex::default()),
        }
    }
}

impl MentionLedger for PersistentMentionLedger {
    fn record(&self, mut mention: MentionRecord) -> Result<u64, StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("ledger.record"))?;
        mention.sequence = index.next_sequence();
        self.wal
            .append(WalEntryKind::MentionAppend(mention.clone()))
            .map_err(|e| StorageError::backend("write-ahead log append", e))?;
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

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;
    use crate::fact::{Fact, RawKey};
    use crate::ledger::RunId;

    fn config() -> PersistentConfig {
        PersistentConfig {
            sync_on_write: false,
            ..PersistentConfig::default()
        }
    }

    fn write_sample(stores: &PersistentStores) {
        let entity = CanonicalEntity::empty(EntityKind::Person, "rick_lagina", Utc::now());
        stores.canonical.upsert(EntityKind::Person, entity).unwrap();
        let fact = Fact::builder(EntityKind::Person, RawKey::text("Rick")).build().unwrap();
        stores.ledger.record_fact("rick_lagina", &fact, RunId::new()).unwrap();
        stores.ledger.record_fact("rick_lagina", &fact, RunId::new()).unwrap();
    }

    #[test]
    fn test_reopen_replays_wal() {
        let dir = tempdir().unwrap();
        {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            write_sample(&stores);
        }

        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        assert!(stores.canonical.get(EntityKind::Person, "rick_lagina").unwrap().is_some());
        let rows = stores.ledger.mentions(EntityKind::Person).unwrap();
        assert_eq!(rows.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let _stores = PersistentStores::open(dir.path(), config()).unwrap();
        match PersistentStores::open(dir.path(), config()) {
            Err(StorageError::Locked(message)) => {
                assert!(message.contains(&format!("pid {}", std::process::id())), "{message}");
            }
            other => panic!("expected a lock error, got {other:?}"),
        }
    }

    #[test]
    fn test_compact_then_reopen() {
        let dir = tempdir().unwrap();
        {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            write_sample(&stores);
            let result = stores.compact().unwrap();
            assert_eq!(result.entries_compacted, 3);
            assert!(result.wal_size_after < result.wal_size_before);
            assert_eq!(stores.segment_count(), 1);

            let fact = Fact::builder(EntityKind::Person, RawKey::text("Marty")).build().unwrap();
            assert_eq!(stores.ledger.record_fact("marty_lagina", &fact, RunId::new()).unwrap(), 3);
        }

        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        assert_eq!(stores.canonical.count(EntityKind::Person).unwrap(), 1);
        assert_eq!(stores.ledger.len().unwrap(), 3);
        assert_eq!(stores.ledger.mentions_for(EntityKind::Person, "marty_lagina").unwrap()[0].sequence, 3);
    }

    #[test]
    fn test_compact_empty_log_is_noop() {
        let dir = tempdir().unwrap();
        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        let result = stores.compact().unwrap();
        assert_eq!(result.entries_compacted, 0);
        assert!(result.segment_path.is_none());
        assert_eq!(stores.segment_count(), 0);
    }

    #[test]
    fn test_reset_discards_everything() {
        let dir = tempdir().unwrap();
        {
            let stores = PersistentStores::open(dir.path(), config()).unwrap();
            write_sample(&stores);
            stores.compact().unwrap();
            write_sample(&stores);
            stores.reset().unwrap();
            assert_eq!(stores.ledger.len().unwrap(), 0);
        }

        let stores = PersistentStores::open(dir.path(), config()).unwrap();
        assert_eq!(stores.canonical.count(EntityKind::Person).unwrap(), 0);
        assert!(stores.ledger.is_empty().unwrap());
        assert_eq!(stores.segment_count(), 0);
    }
}
