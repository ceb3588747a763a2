//! Whole-file JSON documents.
//!
//! A document is either an array of records or an object wrapping arrays:
//! `{"episodes": [...]}`, `{"boreholes": [...]}`, `{"people": [...]}`, or
//! `{"seasons": [{"season": 1, "episodes": [...]}]}`. An object with none of
//! these is read as a single record.

use std::path::Path;

use serde_json::{Map, Value as Json};

use crate::error::IngestError;
use crate::fact::Fact;
use crate::kind::EntityKind;

use super::jsonl::json_type;
use super::record::{decode_record, RecordContext};
use super::SourceSummary;

/// One entry of a document, with the kind implied by where it was found.
struct Entry {
    kind: Option<EntityKind>,
    item: Json,
}

fn wrapper_kind(key: &str) -> Option<EntityKind> {
    EntityKind::ALL
        .into_iter()
        .find(|k| k.table_name() == key || k.as_str() == key)
}

fn season_number(season: &Map<String, Json>) -> Option<Json> {
    ["season", "season_number", "number"]
        .iter()
        .find_map(|f| season.get(*f).filter(|v| v.is_number() || v.is_string()).cloned())
}

fn flatten_seasons(seasons: Vec<Json>, out: &mut Vec<Entry>) {
    for season in seasons {
        let Json::Object(mut season) = season else {
            out.push(Entry { kind: Some(EntityKind::Episode), item: season });
            continue;
        };
        let number = season_number(&season);
        let Some(Json::Array(episodes)) = season.remove("episodes") else {
            continue;
        };
        for episode in episodes {
            let item = match (episode, &number) {
                (Json::Object(mut ep), Some(n)) => {
                    ep.entry("season").or_insert_with(|| n.clone());
                    Json::Object(ep)
                }
                (other, _) => other,
            };
            out.push(Entry { kind: Some(EntityKind::Episode), item });
        }
    }
}

fn entries(root: Json) -> Vec<Entry> {
    let mut out = Vec::new();
    match root {
        Json::Array(items) => out.extend(items.into_iter().map(|item| Entry { kind: None, item })),
        Json::Object(mut obj) => {
            if let Some(Json::Array(seasons)) = obj.remove("seasons") {
                flatten_seasons(seasons, &mut out);
            }
            let wrapped: Vec<String> = obj
                .iter()
                .filter(|(k, v)| v.is_array() && wrapper_kind(k).is_some())
                .map(|(k, _)| k.clone())
                .collect();
            for key in &wrapped {
                if let Some(Json::Array(items)) = obj.remove(key) {
                    let kind = wrapper_kind(key);
                    out.extend(items.into_iter().map(|item| Entry { kind, item }));
                }
            }
            if out.is_empty() {
                out.push(Entry { kind: None, item: Json::Object(obj) });
            }
        }
        other => out.push(Entry { kind: None, item: other }),
    }
    out
}

/// Reads a JSON document. Record positions (1-based) stand in for line
/// numbers in provenance.
pub(crate) fn read(
    path: &Path,
    ctx: &RecordContext<'_>,
    summary: &mut SourceSummary,
) -> Result<Vec<Fact>, IngestError> {
    let bytes = std::fs::read(path).map_err(|e| IngestError::SourceUnreadable {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let root: Json = match serde_json::from_slice(&bytes) {
        Ok(root) => root,
        Err(e) => {
            summary.records += 1;
            summary.record_error(IngestError::MalformedRecord {
                source_name: ctx.file.to_string(),
                line: e.line(),
                reason: format!("invalid JSON document: {e}"),
            });
            return Ok(Vec::new());
        }
    };

    let mut facts = Vec::new();
    for (idx, entry) in entries(root).into_iter().enumerate() {
        let position = idx + 1;
        summary.records += 1;
        let decoded = match &entry.item {
            Json::Object(obj) => decode_record(
                obj,
                &RecordContext {
                    kind: entry.kind.or(ctx.kind),
                    line: position,
                    ..ctx.clone()
                },
            ),
            other => Err(format!("expected a JSON object, found {}", json_type(other))),
        };
        match decoded {
            Ok(fact) => facts.push(fact),
            Err(reason) => summary.record_error(IngestError::MalformedRecord {
                source_name: ctx.file.to_string(),
                line: position,
                reason,
            }),
        }
    }
    Ok(facts)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_seasons_wrapper_injects_season() {
        let doc = json!({"seasons": [
            {"season": 1, "episodes": [{"episode": 1, "title": "Pilot"}, {"episode": 2}]},
            {"season": 2, "episodes": [{"season": 9, "episode": 1}]}
        ]});
        let episodes = entries(doc);
        assert_eq!(episodes.len(), 3);
        assert_eq!(episodes[0].item["season"], json!(1));
        assert_eq!(episodes[2].item["season"], json!(9));
        assert!(episodes.iter().all(|e| e.kind == Some(EntityKind::Episode)));
    }

    #[test]
    fn test_table_wrappers() {
        let boreholes = entries(json!({"boreholes": [{"borehole_id": "H8"}], "generated": "2024"}));
        assert_eq!(boreholes.len(), 1);
        assert_eq!(boreholes[0].kind, Some(EntityKind::Borehole));

        let people = entries(json!({"people": [{"name": "Rick"}, {"name": "Marty"}]}));
        assert_eq!(people.len(), 2);
        assert_eq!(people[1].kind, Some(EntityKind::Person));
    }

    #[test]
    fn test_bare_object_is_one_record() {
        let single = entries(json!({"kind": "theory", "raw_key": "Templar"}));
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].kind, None);
    }
}
