//! CSV override sources.
//!
//! The header row names the fields. Cells are strings; numeric attributes
//! are coerced by the kind schema, and an empty cell means "not reported".

use std::path::Path;

use serde_json::{Map, Value as Json};

use crate::error::IngestError;
use crate::fact::Fact;

use super::record::{decode_record, RecordContext};
use super::SourceSummary;

pub(crate) fn read(
    path: &Path,
    ctx: &RecordContext<'_>,
    summary: &mut SourceSummary,
) -> Result<Vec<Fact>, IngestError> {
    let unreadable = |e: csv::Error| IngestError::SourceUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(unreadable)?;
    let headers = reader.headers().map_err(unreadable)?.clone();

    let mut facts = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                summary.records += 1;
                let line = e.position().map_or(0, |p| p.line() as usize);
                summary.record_error(IngestError::MalformedRecord {
                    source_name: ctx.file.to_string(),
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let line = row.position().map_or(0, |p| p.line() as usize);

        let obj: Map<String, Json> = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, cell)| !cell.is_empty())
            .map(|(name, cell)| (name.to_string(), Json::String(cell.to_string())))
            .collect();
        if obj.is_empty() {
            continue;
        }
        summary.records += 1;

        match decode_record(&obj, &RecordContext { line, ..ctx.clone() }) {
            Ok(fact) => facts.push(fact),
            Err(reason) => summary.record_error(IngestError::MalformedRecord {
                source_name: ctx.file.to_string(),
                line,
                reason,
            }),
        }
    }
    Ok(facts)
}
