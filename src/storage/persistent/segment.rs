//! Snapshot segments.
//!
//! A segment is an immutable file holding the complete canonical tables and
//! ledger as of a compaction. Only the newest segment is loaded; older ones
//! are pruned once a newer one is durable.
//!
//! Segments are written to a temporary file, fsynced, then renamed into
//! place as `segment_00001.seg`, `segment_00002.seg`, and so on.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::memory::{CanonicalIndex, LedgerIndex};

use super::codec;

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = "seg";

#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    pub id: u32,
    pub header: SegmentHeader,
}

impl Segment {
    pub fn open(path: &Path, id: u32) -> IoResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        codec::read_header(&mut reader)?;
        let header: SegmentHeader = codec::decode(&mut reader)?;
        Ok(Self {
            path: path.to_path_buf(),
            id,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_all(&self) -> IoResult<SegmentData> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        codec::read_header(&mut reader)?;
        let _header: SegmentHeader = codec::decode(&mut reader)?;
        codec::decode(&mut reader)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub entity_count: u64,
    pub mention_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Full store state captured by a compaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentData {
    pub canonical: CanonicalIndex,
    pub ledger: LedgerIndex,
}

impl SegmentData {
    pub fn header(&self) -> SegmentHeader {
        SegmentHeader {
            entity_count: self.canonical.total() as u64,
            mention_count: self.ledger.len() as u64,
            created_at: Utc::now(),
        }
    }
}

/// Writes one segment atomically.
pub struct SegmentWriter {
    temp_path: Option<PathBuf>,
    final_path: PathBuf,
    id: u32,
    writer: Option<BufWriter<File>>,
    header: Option<SegmentHeader>,
}

impl SegmentWriter {
    pub fn new(final_path: PathBuf, id: u32) -> IoResult<Self> {
        let temp_path = final_path.with_extension(format!("{SEGMENT_EXT}.tmp.{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer)?;
        Ok(Self {
            temp_path: Some(temp_path),
            final_path,
            id,
            writer: Some(writer),
            header: None,
        })
    }

    pub fn write_data(&mut self, data: &SegmentData) -> IoResult<()> {
        if self.header.is_some() {
            return Err(IoError::new(ErrorKind::Other, "segment data already written"));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;
        let header = data.header();
        writer.write_all(&codec::encode(&header)?)?;
        writer.write_all(&codec::encode(data)?)?;
        self.header = Some(header);
        Ok(())
    }

    /// Flushes, fsyncs and renames into place. The segment is durable once
    /// this returns.
    pub fn finalize(mut self) -> IoResult<Segment> {
        let header = self
            .header
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "segment has no data"))?;
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "writer already consumed"))?;
        let temp_path = self
            .temp_path
            .take()
            .ok_or_else(|| IoError::new(ErrorKind::Other, "temp path already consumed"))?;

        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&temp_path, &self.final_path)?;

        Ok(Segment {
            path: self.final_path.clone(),
            id: self.id,
            header,
        })
    }

    pub fn abort(mut self) -> IoResult<()> {
        self.writer.take();
        if let Some(temp_path) = self.temp_path.take() {
            if temp_path.exists() {
                fs::remove_file(temp_path)?;
            }
        }
        Ok(())
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if let Some(ref temp_path) = self.temp_path {
            let _ = fs::remove_file(temp_path);
        }
    }
}

fn segment_id(path: &Path) -> Option<u32> {
    if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SEGMENT_PREFIX)?
        .parse()
        .ok()
}

/// Tracks the segment files of one store.
#[derive(Debug)]
pub struct SegmentManager {
    dir: PathBuf,
    segments: Vec<Segment>,
    next_segment_id: u32,
}

impl SegmentManager {
    /// Scans `dir`, removing leftovers of interrupted compactions.
    pub fn open(dir: &Path) -> IoResult<Self> {
        fs::create_dir_all(dir)?;
        let mut segments = Vec::new();
        let mut next_segment_id = 1u32;

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(id) = segment_id(&path) {
                next_segment_id = next_segment_id.max(id + 1);
                match Segment::open(&path, id) {
                    Ok(segment) => segments.push(segment),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable segment"),
                }
            } else if path.to_string_lossy().contains(".tmp.") {
                debug!(path = %path.display(), "removing stale segment temp file");
                let _ = fs::remove_file(&path);
            }
        }
        segments.sort_by_key(|s| s.id);

        Ok(Self {
            dir: dir.to_path_buf(),
            segments,
            next_segment_id,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn latest(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn create_segment_writer(&mut self) -> IoResult<SegmentWriter> {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        let path = self.dir.join(format!("{SEGMENT_PREFIX}{id:05}.{SEGMENT_EXT}"));
        SegmentWriter::new(path, id)
    }

    /// Registers a finalized segment and deletes every older one.
    pub fn install(&mut self, segment: Segment) -> IoResult<()> {
        for old in self.segments.drain(..) {
            fs::remove_file(old.path())?;
        }
        self.segments.push(segment);
        Ok(())
    }

    /// Loads the newest snapshot, or an empty state when none exists.
    pub fn load_latest(&self) -> IoResult<SegmentData> {
        self.latest()
            .map_or_else(|| Ok(SegmentData::default()), Segment::read_all)
    }

    /// Deletes every segment.
    pub fn remove_all(&mut self) -> IoResult<()> {
        for segment in self.segments.drain(..) {
            fs::remove_file(segment.path())?;
        }
        Ok(())
    }
}
