//! Provenance of facts.
//!
//! Every fact carries where it came from. The rendered `source_ref` string is
//! what accumulates on canonical entities and what each mention row keeps.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Which kind of upstream producer emitted a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// Heuristic extraction from subtitle text
    Subtitle,
    /// Curated JSON written by hand
    Manual,
    /// Tabular override rows
    CsvOverride,
    /// Episode metadata snapshots
    Metadata,
    Unknown,
}

impl OriginKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subtitle => "subtitle",
            Self::Manual => "manual",
            Self::CsvOverride => "csv_override",
            Self::Metadata => "metadata",
            Self::Unknown => "unknown",
        }
    }

    /// Guesses the origin from a source path when the caller did not declare one.
    #[must_use]
    pub fn infer(path: &Path) -> Self {
        let lowered = path.to_string_lossy().to_ascii_lowercase();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if matches!(ext.as_deref(), Some("csv")) {
            Self::CsvOverride
        } else if lowered.contains("subtitle") || matches!(ext.as_deref(), Some("srt" | "vtt")) {
            Self::Subtitle
        } else if lowered.contains("metadata") {
            Self::Metadata
        } else if lowered.contains("manual") || matches!(ext.as_deref(), Some("json")) {
            Self::Manual
        } else {
            Self::Unknown
        }
    }
}

impl Default for OriginKind {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured reference to the place a fact was read from.
///
/// Sources that already cite their own evidence (a `source_refs` column, a
/// `source_file` field) keep those citations in `cited`; they take the place
/// of the reader location when rendering.
///
/// # Examples
///
/// ```
/// use factfold::{OriginKind, Provenance};
///
/// let p = Provenance::new(OriginKind::Subtitle, "s01e01.jsonl").at_line(12);
/// assert_eq!(p.source_ref(), "subtitle:s01e01.jsonl:12");
///
/// let cited = p.clone().citing(vec!["S01E01.srt:00:12:31".to_string()]);
/// assert_eq!(cited.source_refs(), vec!["S01E01.srt:00:12:31".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: OriginKind,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cited: Vec<String>,
}

impl Provenance {
    #[must_use]
    pub fn new(origin: OriginKind, file: impl Into<String>) -> Self {
        Self {
            origin,
            file: file.into(),
            line: None,
            cited: Vec::new(),
        }
    }

    #[must_use]
    pub const fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Attaches citations carried by the record itself. Blank entries are dropped.
    #[must_use]
    pub fn citing(mut self, refs: Vec<String>) -> Self {
        self.cited = refs
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        self
    }

    /// The reader location, `origin:file[:line]`.
    #[must_use]
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}:{line}", self.origin, self.file),
            None => format!("{}:{}", self.origin, self.file),
        }
    }

    /// Every provenance string this fact contributes to an entity's `source_refs`.
    #[must_use]
    pub fn source_refs(&self) -> Vec<String> {
        if self.cited.is_empty() {
            vec![self.location()]
        } else {
            self.cited.clone()
        }
    }

    /// Single-string rendering kept on mention rows.
    #[must_use]
    pub fn source_ref(&self) -> String {
        self.source_refs().join(";")
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source_ref())
    }
}
