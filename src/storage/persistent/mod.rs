//! Durable single-process storage backend.
//!
//! ```text
//! <store dir>/
//!   .lock                 exclusive flock held while open
//!   factfold.wal          append-only log of upserts and mention appends
//!   segments/
//!     segment_00003.seg   latest compacted snapshot
//! ```
//!
//! Opening loads the newest snapshot, then replays the log on top of it.

mod codec;
mod file_lock;
mod segment;
mod stores;
mod wal;

use std::path::Path;

pub use file_lock::FileLock;
pub use segment::{Segment, SegmentManager};
pub use stores::{CompactionResult, PersistentCanonicalStore, PersistentMentionLedger, PersistentStores};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use crate::error::{FactfoldError, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// Log size that triggers compaction after a pass (bytes).
    pub max_wal_size: u64,
    /// fsync after every log append.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Opens or creates a store at `path`, using defaults when `config` is `None`.
///
/// Fails if another process holds the store or the log is corrupt.
pub fn open_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentStores, FactfoldError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentStores::open(path.as_ref(), cfg)?)
}
