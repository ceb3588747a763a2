//! Write-ahead log.
//!
//! Every store mutation is appended here before it is applied in memory.
//! On open the log is replayed on top of the latest snapshot segment.
//!
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-encoded WalEntry]
//! [ENTRY 2: codec-encoded WalEntry]
//! ...
//! ```
//!
//! A frame cut short at the end of the file (a crash mid-append) is dropped
//! on open. A checksum failure anywhere is reported as corruption.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entity::CanonicalEntity;
use crate::ledger::MentionRecord;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing within one log generation.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: WalEntryKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// Post-merge state of a canonical entity.
    EntityUpsert(CanonicalEntity),
    /// One ledger row, with its sequence already assigned.
    MentionAppend(MentionRecord),
    /// Everything before this marker is in the snapshot segment.
    Checkpoint { up_to_sequence: u64 },
}

fn poisoned(context: &str) -> IoError {
    IoError::new(ErrorKind::Other, format!("poisoned lock: {context}"))
}

/// Append-only log shared by the persistent stores.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    current_sequence: Mutex<u64>,
    sync_on_write: bool,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    /// Opens or creates the log, dropping a torn final frame if present.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let current_sequence = if len >= codec::HEADER_LEN {
            let (last, valid_len) = Self::scan(path)?;
            if valid_len < len {
                warn!(
                    path = %path.display(),
                    dropped_bytes = len - valid_len,
                    "discarding torn write-ahead log tail"
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            last
        } else {
            file.set_len(0)?;
            let mut file = file;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            current_sequence: Mutex::new(current_sequence),
            sync_on_write,
        })
    }

    /// Appends an entry and returns its sequence.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.writer.lock().map_err(|_| poisoned("wal.writer"))?;
        let mut seq = self.current_sequence.lock().map_err(|_| poisoned("wal.sequence"))?;

        let candidate = *seq + 1;
        let encoded = codec::encode(&WalEntry {
            sequence: candidate,
            timestamp: Utc::now(),
            kind,
        })?;
        writer.write_all(&encoded)?;
        writer.flush()?;
        if self.sync_on_write {
            writer.get_ref().sync_all()?;
        }

        *seq = candidate;
        Ok(candidate)
    }

    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(*self.current_sequence.lock().map_err(|_| poisoned("wal.sequence"))?)
    }

    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empties the log back to a bare header.
    ///
    /// Only call this once the state it holds is in a finalized segment.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.writer.lock().map_err(|_| poisoned("wal.writer"))?;
        let mut seq = self.current_sequence.lock().map_err(|_| poisoned("wal.sequence"))?;
        writer.flush()?;

        let mut file = OpenOptions::new().write(true).truncate(true).open(&self.path)?;
        codec::write_header(&mut file)?;
        file.sync_all()?;

        *writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        *seq = 0;
        Ok(())
    }

    /// Last good sequence and the byte length of the valid prefix.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last = 0;
        for entry in iter.by_ref() {
            last = entry?.sequence;
        }
        Ok((last, iter.valid_len))
    }
}

/// Iterator over log entries.
///
/// Stops at end of file or at a torn final frame; yields an error for a
/// frame that is complete but fails its checksum.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
    valid_len: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self {
            reader,
            file_size,
            valid_len: codec::HEADER_LEN,
        })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.valid_len >= self.file_size {
            return None;
        }
        match codec::decode(&mut self.reader) {
            Ok(entry) => match self.reader.stream_position() {
                Ok(pos) => {
                    self.valid_len = pos;
                    Some(Ok(entry))
                }
                Err(e) => Some(Err(e)),
            },
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
