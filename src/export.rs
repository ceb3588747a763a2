//! Export of canonical tables.
//!
//! Per kind with at least one entity, two files:
//!
//! - `<kind>.json`: array of documents (`canonical_key`, `display_attributes`,
//!   `source_refs`, `observed_names`, `stats`)
//! - `<kind>.csv`: one row per entity, schema attributes in declared order,
//!   lists and `source_refs` joined with `;`
//!
//! Rows are sorted by canonical key. Exports read only the canonical store
//! and freshly recomputed aggregates.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::aggregate::{self, AggregateStats, AggregateTable};
use crate::entity::CanonicalEntity;
use crate::error::{ExportError, FactfoldResult};
use crate::fact::KindSchema;
use crate::kind::EntityKind;
use crate::storage::{CanonicalStore, MentionLedger, StorageError};
use crate::value::Value;

/// Statistic columns appended after the schema attributes in CSV exports.
pub const STAT_COLUMNS: &[&str] = &[
    "mention_count",
    "first_season",
    "last_season",
    "first_episode",
    "last_episode",
    "evidence_count",
];

/// One exported entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportDocument {
    pub canonical_key: String,
    pub display_attributes: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: BTreeMap<String, Value>,
    pub source_refs: Vec<String>,
    pub observed_names: Vec<String>,
    pub stats: AggregateStats,
}

impl ExportDocument {
    /// Entities with no mentions get zeroed statistics.
    #[must_use]
    pub fn new(entity: &CanonicalEntity, stats: Option<&AggregateStats>) -> Self {
        Self {
            canonical_key: entity.canonical_key.clone(),
            display_attributes: entity.export_attributes(),
            extra_attributes: entity.extra_attributes.clone(),
            source_refs: entity.source_refs.iter().cloned().collect(),
            observed_names: entity.observed_names.iter().cloned().collect(),
            stats: stats.cloned().unwrap_or_default(),
        }
    }

    fn csv_row(&self, kind: EntityKind) -> Vec<String> {
        let mut row = vec![self.canonical_key.clone()];
        row.extend(KindSchema::of(kind).field_names().map(|name| {
            self.display_attributes
                .get(name)
                .map(Value::to_cell)
                .unwrap_or_default()
        }));
        let opt = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        row.push(self.stats.mention_count.to_string());
        row.push(opt(self.stats.first_season));
        row.push(opt(self.stats.last_season));
        row.push(self.stats.first_episode.clone().unwrap_or_default());
        row.push(self.stats.last_episode.clone().unwrap_or_default());
        row.push(self.stats.evidence_count.to_string());
        row.push(self.source_refs.join(";"));
        row
    }
}

/// Header of a kind's CSV export.
#[must_use]
pub fn csv_columns(kind: EntityKind) -> Vec<&'static str> {
    std::iter::once("canonical_key")
        .chain(KindSchema::of(kind).field_names())
        .chain(STAT_COLUMNS.iter().copied())
        .chain(std::iter::once("source_refs"))
        .collect()
}

/// Documents for every entity of `kind`, in key order.
pub fn documents(
    canonical: &dyn CanonicalStore,
    aggregates: &AggregateTable,
    kind: EntityKind,
) -> Result<Vec<ExportDocument>, StorageError> {
    let stats = aggregates.get(&kind);
    Ok(canonical
        .list(kind)?
        .iter()
        .map(|entity| ExportDocument::new(entity, stats.and_then(|s| s.get(&entity.canonical_key))))
        .collect())
}

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    File::create(path).map(BufWriter::new).map_err(|e| ExportError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Writes `docs` as a pretty-printed JSON array.
pub fn write_json(path: &Path, kind: EntityKind, docs: &[ExportDocument]) -> Result<(), ExportError> {
    let mut writer = create(path)?;
    serde_json::to_writer_pretty(&mut writer, docs).map_err(|e| ExportError::Encode {
        kind: kind.to_string(),
        message: e.to_string(),
    })?;
    std::io::Write::flush(&mut writer).map_err(|e| ExportError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Writes `docs` as a flat CSV table.
pub fn write_csv(path: &Path, kind: EntityKind, docs: &[ExportDocument]) -> Result<(), ExportError> {
    let write_err = |e: csv::Error| ExportError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut writer = csv::Writer::from_writer(create(path)?);
    writer.write_record(csv_columns(kind)).map_err(write_err)?;
    for doc in docs {
        writer.write_record(doc.csv_row(kind)).map_err(write_err)?;
    }
    writer.flush().map_err(|e| ExportError::Write {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Files written by [`export_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub out_dir: PathBuf,
    pub entities: BTreeMap<EntityKind, usize>,
    pub files: Vec<PathBuf>,
}

/// Exports every non-empty kind into `out_dir`, creating it if needed.
///
/// # Errors
///
/// Returns a storage error if the store cannot be read, or an export error
/// if a file cannot be written.
pub fn export_all(
    canonical: &dyn CanonicalStore,
    ledger: &dyn MentionLedger,
    out_dir: &Path,
) -> FactfoldResult<ExportReport> {
    std::fs::create_dir_all(out_dir).map_err(|e| ExportError::Write {
        path: out_dir.to_path_buf(),
        message: e.to_string(),
    })?;
    let aggregates = aggregate::recompute_all(ledger)?;

    let mut report = ExportReport {
        out_dir: out_dir.to_path_buf(),
        ..ExportReport::default()
    };
    for kind in EntityKind::ALL {
        let docs = documents(canonical, &aggregates, kind)?;
        if docs.is_empty() {
            continue;
        }
        let json_path = out_dir.join(format!("{}.json", kind.table_name()));
        let csv_path = out_dir.join(format!("{}.csv", kind.table_name()));
        write_json(&json_path, kind, &docs)?;
        write_csv(&csv_path, kind, &docs)?;
        info!(kind = %kind, entities = docs.len(), out = %out_dir.display(), "exported");

        report.entities.insert(kind, docs.len());
        report.files.push(json_path);
        report.files.push(csv_path);
    }
    Ok(report)
}
