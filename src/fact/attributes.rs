//! Per-kind attribute schemas.
//!
//! Every kind declares the attributes it knows about, how their values are
//! coerced, which source field names map onto them, and which of them are
//! cumulative (merged by set union instead of confidence arbitration).
//! Fields a schema does not know are kept verbatim in a side map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kind::EntityKind;
use crate::value::Value;

/// How a schema field coerces observed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Float,
    Int,
    Bool,
    /// A set of season numbers, read from a list, a single number, or a
    /// `;`/`,` separated string
    SeasonList,
}

/// One declared attribute of a kind.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    /// Merged by set union regardless of confidence.
    pub cumulative: bool,
    /// Alternative source field names mapped onto this attribute.
    pub aliases: &'static [&'static str],
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Text, cumulative: false, aliases: &[] }
}

const fn text_or(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Text, cumulative: false, aliases }
}

const fn float(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Float, cumulative: false, aliases: &[] }
}

const fn float_or(name: &'static str, aliases: &'static [&'static str]) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Float, cumulative: false, aliases }
}

const fn int(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Int, cumulative: false, aliases: &[] }
}

const fn boolean(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Bool, cumulative: false, aliases: &[] }
}

const RELATED_SEASONS: FieldSpec = FieldSpec {
    name: "related_seasons",
    ty: FieldType::SeasonList,
    cumulative: true,
    aliases: &["relatedSeasons", "seasons"],
};

const LOCATION_FIELDS: &[FieldSpec] = &[
    text("name"),
    text_or("location_type", &["type"]),
    float_or("lat", &["latitude"]),
    float_or("lng", &["longitude", "lon"]),
    float("elevation_m"),
    int("first_documented_year"),
    text("era_primary"),
    text("description"),
    RELATED_SEASONS,
];

const EPISODE_FIELDS: &[FieldSpec] = &[
    int("season"),
    int("episode"),
    text("title"),
    text_or("air_date", &["airDate"]),
    text_or("summary", &["shortSummary", "overview"]),
    int("runtime"),
    int("tmdb_episode_id"),
    int("tmdb_show_id"),
];

const ARTIFACT_FIELDS: &[FieldSpec] = &[
    text("name"),
    text_or("category", &["artifact_type"]),
    text("description"),
    text("location_id"),
    text("location_hint"),
    float("depth_m"),
    text("depth_reference"),
    text("found_date_iso"),
    text("era_primary"),
    RELATED_SEASONS,
];

const BOREHOLE_FIELDS: &[FieldSpec] = &[
    text("name"),
    text("location_id"),
    text("location_hint"),
    float_or("lat", &["latitude"]),
    float_or("lng", &["longitude", "lon"]),
    float("collar_elevation_m"),
    float("max_depth_m"),
    text_or("drill_method", &["drill_type"]),
    text_or("era_primary", &["era"]),
    RELATED_SEASONS,
];

const INTERVAL_FIELDS: &[FieldSpec] = &[
    text("borehole_id"),
    float_or("depth_from_m", &["depth_from"]),
    float_or("depth_to_m", &["depth_to"]),
    text("material"),
    boolean("water_intrusion"),
    boolean("sample_taken"),
    text("sample_type"),
    text("lab_result_ref"),
];

const MEASUREMENT_FIELDS: &[FieldSpec] = &[
    text("measurement_type"),
    float("value"),
    text("unit"),
    text("direction"),
    text("context"),
];

const THEORY_FIELDS: &[FieldSpec] = &[
    text("name"),
    text_or("theory_type", &["category"]),
    text("description"),
    RELATED_SEASONS,
];

const PERSON_FIELDS: &[FieldSpec] = &[
    text("name"),
    text("role"),
    text("description"),
    RELATED_SEASONS,
];

const EVENT_FIELDS: &[FieldSpec] = &[
    text("event_type"),
    text_or("description", &["text"]),
    text("location_id"),
    RELATED_SEASONS,
];

/// The declared attributes of one kind, in export column order.
#[derive(Debug, Clone, Copy)]
pub struct KindSchema {
    pub kind: EntityKind,
    pub fields: &'static [FieldSpec],
}

impl KindSchema {
    #[must_use]
    pub const fn of(kind: EntityKind) -> Self {
        let fields = match kind {
            EntityKind::Location => LOCATION_FIELDS,
            EntityKind::Episode => EPISODE_FIELDS,
            EntityKind::Artifact => ARTIFACT_FIELDS,
            EntityKind::Borehole => BOREHOLE_FIELDS,
            EntityKind::Interval => INTERVAL_FIELDS,
            EntityKind::Measurement => MEASUREMENT_FIELDS,
            EntityKind::Theory => THEORY_FIELDS,
            EntityKind::Person => PERSON_FIELDS,
            EntityKind::Event => EVENT_FIELDS,
        };
        Self { kind, fields }
    }

    /// Finds the field a source name maps to, by canonical name or alias.
    #[must_use]
    pub fn field(&self, source_name: &str) -> Option<&'static FieldSpec> {
        self.fields
            .iter()
            .find(|f| f.name == source_name || f.aliases.contains(&source_name))
    }

    #[must_use]
    pub fn is_cumulative(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.cumulative && f.name == name)
    }

    /// Returns true if the kind carries a display `name` attribute.
    #[must_use]
    pub fn has_name(&self) -> bool {
        self.fields.iter().any(|f| f.name == "name")
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|f| f.name)
    }
}

/// Coerces an observed value to a field's declared type.
///
/// Returns `None` when the value cannot be read as that type; the caller keeps
/// the original value in the side map instead of dropping it.
#[must_use]
pub fn coerce(ty: FieldType, value: &Value) -> Option<Value> {
    if value.is_empty() {
        return Some(Value::Null);
    }
    match ty {
        FieldType::Text => value.to_text().map(Value::String),
        FieldType::Float => value.as_float().map(Value::Float),
        FieldType::Int => value.as_int().map(Value::Int),
        FieldType::Bool => value.coerce_bool().map(Value::Bool),
        FieldType::SeasonList => season_list(value).map(|mut seasons| {
            seasons.sort_unstable();
            seasons.dedup();
            Value::List(seasons.into_iter().map(Value::Int).collect())
        }),
    }
}

fn season_list(value: &Value) -> Option<Vec<i64>> {
    match value {
        Value::List(items) => items.iter().map(Value::as_int).collect(),
        Value::String(s) => s
            .split([';', ','])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Value::from(part).as_int())
            .collect(),
        other => other.as_int().map(|v| vec![v]),
    }
}

/// The attributes one fact reports, tagged by kind.
///
/// `fields` holds schema attributes already coerced to their declared type;
/// `extra` holds everything else exactly as observed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl Attributes {
    /// Sorts raw source fields into schema attributes and extras.
    ///
    /// Canonical names win over aliases when a record carries both.
    #[must_use]
    pub fn from_raw<I>(kind: EntityKind, raw: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let schema = KindSchema::of(kind);
        let mut attrs = Self::default();
        for (name, value) in raw {
            match schema.field(&name) {
                Some(spec) => match coerce(spec.ty, &value) {
                    Some(Value::Null) => {}
                    Some(coerced) => {
                        let canonical = spec.name == name;
                        if canonical || !attrs.fields.contains_key(spec.name) {
                            attrs.fields.insert(spec.name.to_string(), coerced);
                        }
                    }
                    None => {
                        attrs.extra.insert(name, value);
                    }
                },
                None if value.is_empty() => {}
                None => {
                    attrs.extra.insert(name, value);
                }
            }
        }
        attrs
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).or_else(|| self.extra.get(name))
    }

    /// Sets a schema attribute without coercion.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.extra.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len() + self.extra.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn test_aliases_and_coercion() {
        let attrs = Attributes::from_raw(
            EntityKind::Location,
            raw(&[
                ("latitude", Value::from("44.5133")),
                ("type", Value::from("shaft")),
                ("related_seasons", Value::from("5; 3;5")),
            ]),
        );
        assert_eq!(attrs.get("lat"), Some(&Value::Float(44.5133)));
        assert_eq!(attrs.get("location_type"), Some(&Value::from("shaft")));
        assert_eq!(attrs.get("related_seasons"), Some(&Value::from(vec![3_i64, 5])));
        assert!(attrs.extra.is_empty());
    }

    #[test]
    fn test_canonical_name_wins_over_alias() {
        let attrs = Attributes::from_raw(
            EntityKind::Location,
            raw(&[("lat", Value::Float(1.0)), ("latitude", Value::Float(2.0))]),
        );
        assert_eq!(attrs.get("lat"), Some(&Value::Float(1.0)));

        let attrs = Attributes::from_raw(
            EntityKind::Location,
            raw(&[("latitude", Value::Float(2.0)), ("lat", Value::Float(1.0))]),
        );
        assert_eq!(attrs.get("lat"), Some(&Value::Float(1.0)));
    }

    #[test]
    fn test_unknown_and_uncoercible_fields_are_preserved() {
        let attrs = Attributes::from_raw(
            EntityKind::Borehole,
            raw(&[
                ("max_depth_m", Value::from("deep")),
                ("casing", Value::from("steel")),
                ("notes", Value::Null),
            ]),
        );
        assert!(attrs.fields.is_empty());
        assert_eq!(attrs.extra.get("max_depth_m"), Some(&Value::from("deep")));
        assert_eq!(attrs.extra.get("casing"), Some(&Value::from("steel")));
        assert!(!attrs.extra.contains_key("notes"));
    }

    #[test]
    fn test_cumulative_is_declared_per_kind() {
        assert!(KindSchema::of(EntityKind::Person).is_cumulative("related_seasons"));
        assert!(!KindSchema::of(EntityKind::Person).is_cumulative("role"));
        assert!(!KindSchema::of(EntityKind::Interval).is_cumulative("related_seasons"));
        assert!(KindSchema::of(EntityKind::Theory).has_name());
        assert!(!KindSchema::of(EntityKind::Measurement).has_name());
    }

    #[test]
    fn test_bool_fields() {
        let attrs = Attributes::from_raw(
            EntityKind::Interval,
            raw(&[("water_intrusion", Value::from("yes")), ("sample_taken", Value::Int(0))]),
        );
        assert_eq!(attrs.get("water_intrusion"), Some(&Value::Bool(true)));
        assert_eq!(attrs.get("sample_taken"), Some(&Value::Bool(false)));
    }
}
