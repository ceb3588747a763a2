//! Record normalization: one loosely-shaped JSON object in, one `Fact` out.
//!
//! Extractors disagree on field names, so decoding is deliberately lenient:
//! numbers may arrive as strings, the key may live in a kind-specific id
//! field, and provenance may be cited by the record or taken from where the
//! reader found it.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value as Json};

use crate::confidence::Confidence;
use crate::fact::{Fact, KindSchema, MentionContext, RawKey};
use crate::identity::episode_key;
use crate::kind::EntityKind;
use crate::source::{OriginKind, Provenance};
use crate::value::Value;

static EPISODE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*s(\d{1,3})\s*e(\d{1,3})\s*$").expect("valid episode code regex")
});

/// Fields that describe the record rather than the entity.
const ENVELOPE_FIELDS: &[&str] = &[
    "kind",
    "fact_type",
    "entity_kind",
    "raw_key",
    "confidence",
    "source",
    "source_refs",
    "source_ref",
    "source_file",
    "attributes",
    "observed_at",
];

/// Mention-context fields; kept as attributes only where a schema declares them.
const CONTEXT_FIELDS: &[&str] = &["season", "episode", "timestamp", "start", "text", "snippet"];

/// Where the reader found a record.
#[derive(Debug, Clone)]
pub struct RecordContext<'a> {
    /// Kind declared for the whole source, used when a record has none.
    pub kind: Option<EntityKind>,
    pub origin: OriginKind,
    pub file: &'a str,
    pub line: usize,
    pub observed_at: DateTime<Utc>,
}

fn as_u32(value: &Json) -> Option<u32> {
    match value {
        Json::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Json) -> Option<String> {
    let text = match value {
        Json::String(s) => s.trim().to_string(),
        Json::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn first<'a, 'n>(obj: &'a Map<String, Json>, names: &[&'n str]) -> Option<(&'n str, &'a Json)> {
    names
        .iter()
        .find_map(|name| obj.get(*name).filter(|v| !v.is_null()).map(|v| (*name, v)))
}

/// Per-kind fields that can carry the identifier, in preference order.
const KEY_FIELDS: &[(EntityKind, &[&str])] = &[
    (EntityKind::Person, &["person", "name", "id"]),
    (EntityKind::Theory, &["theory", "name", "id"]),
    (EntityKind::Location, &["location_id", "name", "id"]),
    (EntityKind::Artifact, &["artifact_id", "name", "id"]),
    (EntityKind::Borehole, &["borehole_id", "name", "id"]),
    (EntityKind::Measurement, &["measurement_id", "id"]),
    (EntityKind::Event, &["event_id", "id"]),
    (EntityKind::Episode, &["id"]),
    (EntityKind::Interval, &["interval_id", "id"]),
];

fn key_fields(kind: EntityKind) -> &'static [&'static str] {
    KEY_FIELDS
        .iter()
        .find(|(k, _)| *k == kind)
        .map_or(&[][..], |(_, fields)| fields)
}

fn decode_kind(obj: &Map<String, Json>, ctx: &RecordContext<'_>) -> Result<EntityKind, String> {
    match first(obj, &["kind", "fact_type", "entity_kind"]) {
        Some((field, value)) => {
            let text = value
                .as_str()
                .ok_or_else(|| format!("'{field}' must be a string"))?;
            text.parse::<EntityKind>().map_err(|e| e.to_string())
        }
        None => ctx
            .kind
            .ok_or_else(|| "record has no kind and the source declares none".to_string()),
    }
}

/// Season and episode from top-level fields or a nested `episode` object.
fn episode_position(obj: &Map<String, Json>) -> (Option<u32>, Option<u32>) {
    match obj.get("episode") {
        Some(Json::Object(nested)) => (
            nested.get("season").and_then(as_u32),
            nested.get("episode").and_then(as_u32),
        ),
        other => (obj.get("season").and_then(as_u32), other.and_then(as_u32)),
    }
}

fn parse_episode_code(text: &str) -> Option<(u32, u32)> {
    let caps = EPISODE_CODE.captures(text)?;
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
}

/// Synthesized identity for kinds that are identified by their content.
fn content_key(kind: EntityKind, obj: &Map<String, Json>, attrs: &Map<String, Json>) -> Option<String> {
    let field = |name: &str| attrs.get(name).or_else(|| obj.get(name)).and_then(as_text);
    let fields: &[&str] = match kind {
        EntityKind::Measurement => &["measurement_type", "value", "unit", "direction"],
        EntityKind::Event => &["event_type"],
        _ => return None,
    };
    let mut parts: Vec<String> = fields.iter().filter_map(|f| field(*f)).collect();
    if parts.is_empty() {
        return None;
    }
    let (season, episode) = episode_position(obj);
    let timestamp = obj
        .get("timestamp")
        .or_else(|| obj.get("start"))
        .and_then(as_text);
    let mut key = Vec::new();
    if let (Some(s), Some(e)) = (season, episode) {
        key.push(episode_key(s, e));
    }
    key.extend(timestamp);
    key.append(&mut parts);
    Some(key.join(" "))
}

fn decode_raw_key(
    kind: EntityKind,
    obj: &Map<String, Json>,
    attrs: &Map<String, Json>,
) -> Result<(RawKey, Option<&'static str>), String> {
    match kind {
        EntityKind::Episode => {
            if let Some(Json::Object(key)) = obj.get("raw_key") {
                if let (Some(s), Some(e)) = (key.get("season").and_then(as_u32), key.get("episode").and_then(as_u32)) {
                    return Ok((RawKey::episode(s, e), None));
                }
            }
            if let Some((s, e)) = obj.get("raw_key").and_then(Json::as_str).and_then(parse_episode_code) {
                return Ok((RawKey::episode(s, e), None));
            }
            match episode_position(obj) {
                (Some(s), Some(e)) => Ok((RawKey::episode(s, e), None)),
                _ => Err("episode record needs season and episode".to_string()),
            }
        }
        EntityKind::Interval => {
            let borehole = first(obj, &["borehole_id", "borehole"])
                .or_else(|| first(attrs, &["borehole_id", "borehole"]))
                .and_then(|(_, v)| as_text(v));
            let depth = |names: &[&str]| {
                names
                    .iter()
                    .find_map(|n| attrs.get(*n).or_else(|| obj.get(*n)).and_then(as_f64))
            };
            match (borehole, depth(&["depth_from_m", "depth_from"]), depth(&["depth_to_m", "depth_to"])) {
                (Some(b), Some(from), Some(to)) => Ok((RawKey::interval(b, from, to), None)),
                _ => Err("interval record needs borehole_id, depth_from and depth_to".to_string()),
            }
        }
        _ => {
            if let Some(text) = obj.get("raw_key").and_then(as_text) {
                return Ok((RawKey::text(text), None));
            }
            if let Some((field, text)) = key_fields(kind)
                .iter()
                .find_map(|f| attrs.get(*f).or_else(|| obj.get(*f)).and_then(as_text).map(|t| (*f, t)))
            {
                return Ok((RawKey::text(text), Some(field)));
            }
            content_key(kind, obj, attrs)
                .map(|text| (RawKey::text(text), None))
                .ok_or_else(|| format!("no identifier field for {kind} record"))
        }
    }
}

fn decode_origin(value: &Json, fallback: OriginKind) -> OriginKind {
    serde_json::from_value(value.clone()).unwrap_or(fallback)
}

fn split_refs(value: &Json) -> Vec<String> {
    match value {
        Json::String(s) => s.split(';').map(str::to_string).collect(),
        Json::Array(items) => items.iter().filter_map(as_text).collect(),
        _ => Vec::new(),
    }
}

fn decode_provenance(obj: &Map<String, Json>, ctx: &RecordContext<'_>) -> Provenance {
    let mut provenance = Provenance::new(ctx.origin, ctx.file).at_line(ctx.line);
    if let Some(Json::Object(source)) = obj.get("source") {
        if let Some(origin) = source.get("kind") {
            provenance.origin = decode_origin(origin, ctx.origin);
        }
        if let Some(file) = source.get("file").and_then(as_text) {
            provenance.file = file;
            provenance.line = source.get("line").and_then(as_u32).map(|l| l as usize);
        }
    }
    let cited = first(obj, &["source_refs", "source_ref", "source_file"])
        .map(|(_, v)| split_refs(v))
        .unwrap_or_default();
    provenance.citing(cited)
}

fn decode_context(obj: &Map<String, Json>) -> MentionContext {
    let (season, episode) = episode_position(obj);
    MentionContext {
        season,
        episode,
        timestamp: first(obj, &["timestamp", "start"]).and_then(|(_, v)| as_text(v)),
        text: first(obj, &["snippet", "text"]).and_then(|(_, v)| as_text(v)),
    }
}

/// Decodes one record.
///
/// # Errors
///
/// Returns the reason the record cannot become a fact; the caller counts it
/// as malformed.
pub fn decode_record(obj: &Map<String, Json>, ctx: &RecordContext<'_>) -> Result<Fact, String> {
    let kind = decode_kind(obj, ctx)?;
    let schema = KindSchema::of(kind);
    let empty = Map::new();
    let nested = match obj.get("attributes") {
        Some(Json::Object(map)) => map,
        Some(Json::Null) | None => &empty,
        Some(_) => return Err("'attributes' must be an object".to_string()),
    };

    let (raw_key, key_field) = decode_raw_key(kind, obj, nested)?;

    let keep = |name: &str| {
        if ENVELOPE_FIELDS.contains(&name) {
            return false;
        }
        let known = schema.field(name).is_some();
        if CONTEXT_FIELDS.contains(&name) || Some(name) == key_field {
            return known;
        }
        true
    };
    let top_level = obj
        .iter()
        .filter(|(name, value)| keep(name) && !(CONTEXT_FIELDS.contains(&name.as_str()) && value.is_object()))
        .map(|(name, v)| (name.clone(), Value::from_json(v)));
    let from_nested = nested.iter().map(|(name, v)| (name.clone(), Value::from_json(v)));

    let confidence = obj.get("confidence").and_then(as_f64);

    Fact::builder(kind, raw_key)
        .attributes(top_level.chain(from_nested))
        .confidence(Confidence::lenient(confidence))
        .provenance(decode_provenance(obj, ctx))
        .context(decode_context(obj))
        .observed_at(ctx.observed_at)
        .build()
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(kind: Option<EntityKind>) -> RecordContext<'static> {
        RecordContext {
            kind,
            origin: OriginKind::Subtitle,
            file: "people.jsonl",
            line: 4,
            observed_at: Utc::now(),
        }
    }

    fn decode(value: Json, kind: Option<EntityKind>) -> Result<Fact, String> {
        decode_record(value.as_object().unwrap(), &ctx(kind))
    }

    #[test]
    fn test_person_from_person_field() {
        let fact = decode(
            json!({"person": "Rick", "season": "2", "episode": 5, "timestamp": "00:01:02,000",
                   "text": "Rick says", "confidence": 0.7, "source_file": "S02E05.srt"}),
            Some(EntityKind::Person),
        )
        .unwrap();

        assert_eq!(fact.raw_key, RawKey::text("Rick"));
        assert_eq!(fact.context.season, Some(2));
        assert_eq!(fact.context.episode, Some(5));
        assert_eq!(fact.context.text.as_deref(), Some("Rick says"));
        assert!((fact.confidence.value() - 0.7).abs() < 1e-6);
        assert_eq!(fact.source_refs(), vec!["S02E05.srt".to_string()]);
        assert!(fact.attributes.extra.is_empty());
    }

    #[test]
    fn test_kind_from_record_overrides_source() {
        let fact = decode(json!({"kind": "theory", "raw_key": "Templar"}), Some(EntityKind::Person)).unwrap();
        assert_eq!(fact.kind, EntityKind::Theory);

        let err = decode(json!({"raw_key": "Templar"}), None).unwrap_err();
        assert!(err.contains("no kind"));
        assert!(decode(json!({"kind": "pirate", "raw_key": "x"}), None).is_err());
    }

    #[test]
    fn test_episode_key_forms() {
        let nested = decode(json!({"episode": {"season": 1, "episode": 2}, "title": "Pilot"}), Some(EntityKind::Episode)).unwrap();
        assert_eq!(nested.raw_key, RawKey::episode(1, 2));

        let code = decode(json!({"raw_key": "S03E11"}), Some(EntityKind::Episode)).unwrap();
        assert_eq!(code.raw_key, RawKey::episode(3, 11));

        let flat = decode(json!({"season": 4, "episode": 1, "airDate": "2016-11-15"}), Some(EntityKind::Episode)).unwrap();
        assert_eq!(flat.attributes.get("air_date"), Some(&Value::from("2016-11-15")));
        assert_eq!(flat.attributes.get("season"), Some(&Value::Int(4)));

        assert!(decode(json!({"title": "no position"}), Some(EntityKind::Episode)).is_err());
    }

    #[test]
    fn test_interval_key() {
        let fact = decode(
            json!({"borehole_id": "H8", "depth_from": "30", "depth_to": 32.5, "material": "clay"}),
            Some(EntityKind::Interval),
        )
        .unwrap();
        assert_eq!(fact.raw_key, RawKey::interval("H8", 30.0, 32.5));
        assert_eq!(fact.attributes.get("material"), Some(&Value::from("clay")));
    }

    #[test]
    fn test_measurement_key_is_synthesized() {
        let fact = decode(
            json!({"season": 1, "episode": 2, "timestamp": "00:10:00,000",
                   "measurement_type": "depth", "value": 90, "unit": "ft"}),
            Some(EntityKind::Measurement),
        )
        .unwrap();
        assert_eq!(fact.raw_key, RawKey::text("s01e02 00:10:00,000 depth 90 ft"));
        assert_eq!(fact.attributes.get("unit"), Some(&Value::from("ft")));
    }

    #[test]
    fn test_nested_attributes_and_extras() {
        let fact = decode(
            json!({"kind": "location", "location_id": "money_pit",
                   "attributes": {"name": "Money Pit", "latitude": "44.51", "colour": "brown"}}),
            None,
        )
        .unwrap();
        assert_eq!(fact.raw_key, RawKey::text("money_pit"));
        assert_eq!(fact.attributes.get("name"), Some(&Value::from("Money Pit")));
        assert_eq!(fact.attributes.get("lat"), Some(&Value::Float(44.51)));
        assert_eq!(fact.attributes.extra.get("colour"), Some(&Value::from("brown")));
    }

    #[test]
    fn test_provenance_defaults_to_reader_location() {
        let fact = decode(json!({"raw_key": "Gary"}), Some(EntityKind::Person)).unwrap();
        assert_eq!(fact.provenance.source_ref(), "subtitle:people.jsonl:4");

        let explicit = decode(
            json!({"raw_key": "Gary", "source": {"kind": "manual", "file": "curated.json", "line": 9}}),
            Some(EntityKind::Person),
        )
        .unwrap();
        assert_eq!(explicit.provenance.source_ref(), "manual:curated.json:9");
    }

    #[test]
    fn test_bad_confidence_is_lenient() {
        let fact = decode(json!({"raw_key": "Gary", "confidence": "high"}), Some(EntityKind::Person)).unwrap();
        assert!((fact.confidence.value() - 1.0).abs() < f32::EPSILON);

        let clamped = decode(json!({"raw_key": "Gary", "confidence": 7}), Some(EntityKind::Person)).unwrap();
        assert!((clamped.confidence.value() - 1.0).abs() < f32::EPSILON);
    }
}
