//! Fact Store Reader.
//!
//! Turns a list of declared sources into an ordered stream of facts. A
//! source is a file or a directory; directories are walked recursively and
//! their files read in lexicographic order, each file top to bottom, so two
//! runs over unchanged inputs see the same facts in the same order.
//!
//! Bad records are skipped and counted in the source's [`SourceSummary`].
//! A missing optional source contributes zero facts and a warning; a missing
//! required source is the only read failure that stops a pass.

mod json;
mod jsonl;
mod record;
mod tabular;

use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::fact::Fact;
use crate::kind::EntityKind;
use crate::source::OriginKind;

pub use record::{decode_record, RecordContext};

/// Error messages kept per source; further errors are only counted.
pub const MAX_RECORDED_ERRORS: usize = 20;

const SUPPORTED_EXTENSIONS: &[&str] = &["jsonl", "ndjson", "json", "csv"];

/// One declared input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// Whether a pass must fail when the path does not exist.
    pub required: bool,
    /// Kind of every record without its own, overriding the file-name guess.
    pub kind: Option<EntityKind>,
    pub origin: Option<OriginKind>,
}

impl SourceSpec {
    #[must_use]
    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: false,
            kind: None,
            origin: None,
        }
    }

    #[must_use]
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            required: true,
            ..Self::optional(path)
        }
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub const fn with_origin(mut self, origin: OriginKind) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Per-source counters reported in the run summary.
///
/// The reader fills the read-side counters; the engine fills the rest while
/// folding the source's facts into the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub source: String,
    pub required: bool,
    pub missing: bool,
    pub files: usize,
    /// Non-blank records seen, well-formed or not.
    pub records: usize,
    pub facts: usize,
    pub malformed: usize,
    pub unreadable: usize,
    /// Facts resolved, merged and recorded.
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Facts never applied because the pass stopped early.
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SourceSummary {
    #[must_use]
    pub fn new(spec: &SourceSpec) -> Self {
        Self {
            source: spec.path.display().to_string(),
            required: spec.required,
            ..Self::default()
        }
    }

    /// Counts a recovered error and logs it.
    pub fn record_error(&mut self, err: IngestError) {
        match &err {
            IngestError::MalformedRecord { source_name, line, reason } => {
                self.malformed += 1;
                warn!(source = %self.source, file = %source_name, line, reason = %reason, "skipping malformed record");
            }
            IngestError::SourceUnreadable { path, message } => {
                self.unreadable += 1;
                warn!(source = %self.source, path = %path.display(), error = %message, "skipping unreadable file");
            }
            IngestError::MissingSource { path, .. } => {
                self.missing = true;
                warn!(source = %self.source, path = %path.display(), "source not found");
            }
            IngestError::StoreWriteFailure { message } => {
                warn!(source = %self.source, error = %message, "store write failed");
            }
        }
        if self.errors.len() < MAX_RECORDED_ERRORS {
            self.errors.push(err.to_string());
        }
    }

    /// Number of records that did not become facts.
    #[must_use]
    pub const fn rejected(&self) -> usize {
        self.malformed + self.unreadable
    }
}

/// Facts of one source, in read order, with its summary.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub summary: SourceSummary,
    pub facts: Vec<Fact>,
}

/// Reads declared sources into fact batches.
#[derive(Debug, Clone)]
pub struct FactReader {
    workers: usize,
    observed_at: Option<DateTime<Utc>>,
}

impl Default for FactReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FactReader {
    /// Sequential reader stamping facts with the time of each read.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            workers: 1,
            observed_at: None,
        }
    }

    /// Decodes up to `workers` sources at a time. Output order is unchanged.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Fixes the ingestion time recorded on every fact read.
    #[must_use]
    pub const fn with_observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    fn stamp(&self) -> DateTime<Utc> {
        self.observed_at.unwrap_or_else(Utc::now)
    }

    /// Fails on the first required source whose path does not exist.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MissingSource` naming that path.
    pub fn check_required(specs: &[SourceSpec]) -> Result<(), IngestError> {
        match specs.iter().find(|s| s.required && !s.path.exists()) {
            Some(spec) => Err(IngestError::MissingSource {
                path: spec.path.clone(),
                required: true,
            }),
            None => Ok(()),
        }
    }

    /// Reads every source, returning batches in declared order.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MissingSource` if a required source is missing.
    pub fn read(&self, specs: &[SourceSpec]) -> Result<Vec<SourceBatch>, IngestError> {
        Self::check_required(specs)?;
        let at = self.stamp();
        if self.workers > 1 && specs.len() > 1 {
            self.read_parallel(specs, at)
        } else {
            specs.iter().map(|spec| self.read_source_at(spec, at)).collect()
        }
    }

    /// Reads one source.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MissingSource` if the source is required and
    /// its path does not exist.
    pub fn read_source(&self, spec: &SourceSpec) -> Result<SourceBatch, IngestError> {
        self.read_source_at(spec, self.stamp())
    }

    fn read_source_at(&self, spec: &SourceSpec, observed_at: DateTime<Utc>) -> Result<SourceBatch, IngestError> {
        let mut summary = SourceSummary::new(spec);
        if !spec.path.exists() {
            let err = IngestError::MissingSource {
                path: spec.path.clone(),
                required: spec.required,
            };
            if spec.required {
                return Err(err);
            }
            summary.record_error(err);
            return Ok(SourceBatch {
                summary,
                facts: Vec::new(),
            });
        }

        let files = discover(&spec.path, &mut summary);

        let mut facts = Vec::new();
        for file in &files {
            summary.files += 1;
            let label = file_label(&spec.path, file);
            let ctx = RecordContext {
                kind: spec.kind.or_else(|| EntityKind::from_file_stem(file)),
                origin: spec.origin.unwrap_or_else(|| OriginKind::infer(file)),
                file: &label,
                line: 0,
                observed_at,
            };
            match read_file(file, &ctx, &mut summary) {
                Ok(mut read) => facts.append(&mut read),
                Err(e) => summary.record_error(e),
            }
        }
        summary.facts = facts.len();

        info!(
            source = %summary.source,
            files = summary.files,
            records = summary.records,
            facts = summary.facts,
            malformed = summary.malformed,
            "read source"
        );
        Ok(SourceBatch { summary, facts })
    }

    /// Worker threads decode sources; results are slotted back into declared
    /// order before anything downstream sees them.
    fn read_parallel(&self, specs: &[SourceSpec], at: DateTime<Utc>) -> Result<Vec<SourceBatch>, IngestError> {
        let workers = self.workers.min(specs.len());
        let (job_tx, job_rx) = bounded::<(usize, &SourceSpec)>(specs.len());
        let (done_tx, done_rx) = bounded::<(usize, Result<SourceBatch, IngestError>)>(specs.len());

        for job in specs.iter().enumerate() {
            if job_tx.send(job).is_err() {
                break;
            }
        }
        drop(job_tx);

        thread::scope(|scope| {
            for idx in 0..workers {
                let rx = job_rx.clone();
                let tx = done_tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("factfold-reader-{idx}"))
                    .spawn_scoped(scope, move || {
                        for (pos, spec) in rx.iter() {
                            if tx.send((pos, self.read_source_at(spec, at))).is_err() {
                                break;
                            }
                        }
                    });
                if let Err(e) = spawned {
                    warn!(worker = idx, error = %e, "failed to spawn reader thread");
                    break;
                }
            }
        });
        drop(done_tx);

        let mut slots: Vec<Option<Result<SourceBatch, IngestError>>> =
            specs.iter().map(|_| None).collect();
        for (pos, result) in done_rx.try_iter() {
            slots[pos] = Some(result);
        }

        // Anything no worker got to is read here.
        slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| slot.unwrap_or_else(|| self.read_source_at(spec, at)))
            .collect()
    }
}

fn read_file(
    path: &Path,
    ctx: &RecordContext<'_>,
    summary: &mut SourceSummary,
) -> Result<Vec<Fact>, IngestError> {
    match extension(path).as_deref() {
        Some("json") => json::read(path, ctx, summary),
        Some("csv") => tabular::read(path, ctx, summary),
        _ => jsonl::read(path, ctx, summary),
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Files of a source in read order. A file path is read whatever its
/// extension; directories contribute only supported, non-hidden files.
///
/// A directory or entry that cannot be read is recorded in `summary` and
/// skipped; the rest of the tree is still walked.
fn discover(path: &Path, summary: &mut SourceSummary) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let unreadable = |path: &Path, e: std::io::Error| IngestError::SourceUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                summary.record_error(unreadable(&dir, e));
                continue;
            }
        };
        for entry in entries {
            let entry_path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    summary.record_error(unreadable(&dir, e));
                    continue;
                }
            };
            if is_hidden(&entry_path) {
                continue;
            }
            if entry_path.is_dir() {
                pending.push(entry_path);
            } else if extension(&entry_path)
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            {
                files.push(entry_path);
            }
        }
    }
    files.sort();
    files
}

/// Name used in provenance: the file name, or the path below a directory source.
fn file_label(source: &Path, file: &Path) -> String {
    let relative = if source.is_dir() {
        file.strip_prefix(source).unwrap_or(file)
    } else {
        file.file_name().map_or(file, Path::new)
    };
    relative.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::fact::RawKey;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_jsonl_counts_malformed_and_keeps_going() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "people.jsonl",
            "{\"person\": \"Rick\", \"confidence\": 0.8}\n\nnot json\n[1, 2]\n{\"person\": \"Marty\"}\n",
        );

        let batch = FactReader::new()
            .read_source(&SourceSpec::optional(&path))
            .unwrap();
        assert_eq!(batch.facts.len(), 2);
        assert_eq!(batch.summary.records, 4);
        assert_eq!(batch.summary.malformed, 2);
        assert_eq!(batch.summary.errors.len(), 2);
        assert!(batch.summary.errors[0].contains("line 3"));
        assert_eq!(batch.facts[0].kind, EntityKind::Person);
        assert_eq!(batch.facts[1].provenance.source_ref(), "unknown:people.jsonl:5");
    }

    #[test]
    fn test_invalid_utf8_line_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.jsonl");
        let mut body = b"{\"person\": \"Rick\"}\n".to_vec();
        body.extend_from_slice(b"{\"person\": \"\xff\xfe\"}\n");
        body.extend_from_slice(b"{\"person\": \"Marty\"}\n");
        fs::write(&path, body).unwrap();

        let batch = FactReader::new()
            .read_source(&SourceSpec::optional(&path))
            .unwrap();
        assert_eq!(batch.facts.len(), 2);
        assert_eq!(batch.summary.malformed, 1);
        assert!(batch.summary.errors[0].contains("line 2"));
        assert!(batch.summary.errors[0].contains("UTF-8"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_jsonl_read_failure_is_recorded_not_returned() {
        let dir = TempDir::new().unwrap();
        let spec = SourceSpec::optional(dir.path());
        let mut summary = SourceSummary::new(&spec);
        let ctx = RecordContext {
            kind: Some(EntityKind::Person),
            origin: OriginKind::Subtitle,
            file: "people.jsonl",
            line: 0,
            observed_at: Utc::now(),
        };

        // A directory opens on Linux but every read fails.
        let facts = jsonl::read(dir.path(), &ctx, &mut summary).unwrap();
        assert!(facts.is_empty());
        assert_eq!(summary.unreadable, 1);
        assert!(summary.errors[0].contains("line 1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_keeps_the_rest_of_the_source() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        write(dir.path(), "open/people.jsonl", "{\"person\": \"Rick\"}\n");
        write(dir.path(), "locked/people.jsonl", "{\"person\": \"Marty\"}\n");
        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users read through the mode bits.
        let denied = fs::read_dir(&locked).is_err();

        let batch = FactReader::new()
            .read_source(&SourceSpec::optional(dir.path()))
            .unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(batch.facts.iter().any(|f| f.raw_key == RawKey::text("Rick")));
        if denied {
            assert_eq!(batch.facts.len(), 1);
            assert_eq!(batch.summary.unreadable, 1);
        } else {
            assert_eq!(batch.facts.len(), 2);
        }
    }

    #[test]
    fn test_each_read_is_stamped_with_its_own_time() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "people.jsonl", "{\"person\": \"Rick\"}\n");
        let specs = [SourceSpec::optional(&path)];
        let reader = FactReader::new();

        let first = reader.read(&specs).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = reader.read(&specs).unwrap();
        assert!(second[0].facts[0].observed_at > first[0].facts[0].observed_at);

        let at = Utc::now();
        let fixed = FactReader::new().with_observed_at(at);
        assert_eq!(fixed.read(&specs).unwrap()[0].facts[0].observed_at, at);
        assert_eq!(fixed.read(&specs).unwrap()[0].facts[0].observed_at, at);
    }

    #[test]
    fn test_missing_optional_source_is_empty() {
        let dir = TempDir::new().unwrap();
        let spec = SourceSpec::optional(dir.path().join("theories.jsonl"));

        let batches = FactReader::new().read(&[spec]).unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].facts.is_empty());
        assert!(batches[0].summary.missing);
    }

    #[test]
    fn test_missing_required_source_fails() {
        let dir = TempDir::new().unwrap();
        let present = write(dir.path(), "people.jsonl", "{\"person\": \"Rick\"}\n");
        let specs = vec![
            SourceSpec::optional(present),
            SourceSpec::required(dir.path().join("episodes.json")),
        ];

        let err = FactReader::new().read(&specs).unwrap_err();
        assert!(matches!(err, IngestError::MissingSource { required: true, .. }));
    }

    #[test]
    fn test_directory_is_read_in_sorted_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b/people.jsonl", "{\"person\": \"Dan Blankenship\"}\n");
        write(dir.path(), "a/people.jsonl", "{\"person\": \"Rick\"}\n");
        write(dir.path(), ".hidden.jsonl", "{\"person\": \"Ghost\"}\n");
        write(dir.path(), "notes.txt", "ignored");

        let batch = FactReader::new()
            .read_source(&SourceSpec::optional(dir.path()))
            .unwrap();
        assert_eq!(batch.summary.files, 2);
        let keys: Vec<_> = batch.facts.iter().map(|f| f.raw_key.clone()).collect();
        assert_eq!(keys, vec![RawKey::text("Rick"), RawKey::text("Dan Blankenship")]);
        assert_eq!(batch.facts[0].provenance.file, "a/people.jsonl");
    }

    #[test]
    fn test_declared_kind_overrides_file_name() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "extra.jsonl", "{\"name\": \"Money Pit\"}\n");

        let batch = FactReader::new()
            .read_source(&SourceSpec::optional(&path).with_kind(EntityKind::Location))
            .unwrap();
        assert_eq!(batch.facts.len(), 1);
        assert_eq!(batch.facts[0].kind, EntityKind::Location);
    }

    #[test]
    fn test_parallel_read_preserves_declared_order() {
        let dir = TempDir::new().unwrap();
        let mut specs = Vec::new();
        for i in 0..6 {
            let body: String = (0..20)
                .map(|n| format!("{{\"person\": \"Person {i} {n}\"}}\n"))
                .collect();
            specs.push(SourceSpec::optional(write(dir.path(), &format!("people_{i}.jsonl"), &body)));
        }
        specs.push(SourceSpec::optional(dir.path().join("missing.jsonl")));

        let at = Utc::now();
        let sequential = FactReader::new().with_observed_at(at).read(&specs).unwrap();
        let parallel = FactReader::new()
            .with_observed_at(at)
            .with_workers(4)
            .read(&specs)
            .unwrap();

        assert_eq!(parallel.len(), sequential.len());
        for (p, s) in parallel.iter().zip(&sequential) {
            assert_eq!(p.summary, s.summary);
            assert_eq!(p.facts, s.facts);
        }
        assert!(parallel[6].summary.missing);
    }
}
