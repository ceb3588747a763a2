//! Line-delimited JSON sources: one record per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde_json::Value as Json;

use crate::error::IngestError;
use crate::fact::Fact;

use super::record::{decode_record, RecordContext};
use super::SourceSummary;

/// Reads every line of `path`. Blank lines are ignored; lines that are not
/// UTF-8, not JSON objects, or not decodable are counted as malformed.
///
/// Only a file that cannot be opened is an error. A read failure partway
/// through is recorded in `summary` and the facts before it are returned.
pub(crate) fn read(
    path: &Path,
    ctx: &RecordContext<'_>,
    summary: &mut SourceSummary,
) -> Result<Vec<Fact>, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::SourceUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut facts = Vec::new();
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line_no = idx + 1;
        // An I/O failure ends this file; what was decoded before it stays.
        let bytes = match line {
            Ok(bytes) => bytes,
            Err(e) => {
                summary.record_error(IngestError::SourceUnreadable {
                    path: path.to_path_buf(),
                    message: format!("line {line_no}: {e}"),
                });
                break;
            }
        };
        let malformed = |reason: String| IngestError::MalformedRecord {
            source_name: ctx.file.to_string(),
            line: line_no,
            reason,
        };

        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text.trim(),
            Err(e) => {
                summary.record_error(malformed(format!("invalid UTF-8: {e}")));
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }
        summary.records += 1;

        let decoded = match serde_json::from_str::<Json>(text) {
            Ok(Json::Object(obj)) => decode_record(&obj, &RecordContext { line: line_no, ..ctx.clone() }),
            Ok(other) => Err(format!("expected a JSON object, found {}", json_type(&other))),
            Err(e) => Err(format!("invalid JSON: {e}")),
        };
        match decoded {
            Ok(fact) => facts.push(fact),
            Err(reason) => summary.record_error(malformed(reason)),
        }
    }
    Ok(facts)
}

pub(crate) const fn json_type(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "a boolean",
        Json::Number(_) => "a number",
        Json::String(_) => "a string",
        Json::Array(_) => "an array",
        Json::Object(_) => "an object",
    }
}
