//! Entity kinds.
//!
//! Every fact and every canonical entity belongs to exactly one kind. Keys
//! are unique within a kind, never across kinds.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Classification of the things the documentary facts talk about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityKind {
    /// A named place on or around the island
    Location,
    /// One episode of the series, keyed by `(season, episode)`
    Episode,
    /// A physical object found or discussed
    Artifact,
    /// A drilled borehole, keyed by its code
    Borehole,
    /// A depth interval within a borehole
    Interval,
    /// A numeric measurement read out on screen or in narration
    Measurement,
    /// A theory about the site
    Theory,
    /// A person appearing in or mentioned by the series
    Person,
    /// A discovery or activity
    Event,
}

impl EntityKind {
    /// All kinds, in canonical table order.
    pub const ALL: [Self; 9] = [
        Self::Location,
        Self::Episode,
        Self::Artifact,
        Self::Borehole,
        Self::Interval,
        Self::Measurement,
        Self::Theory,
        Self::Person,
        Self::Event,
    ];

    /// The lowercase wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Location => "location",
            Self::Episode => "episode",
            Self::Artifact => "artifact",
            Self::Borehole => "borehole",
            Self::Interval => "interval",
            Self::Measurement => "measurement",
            Self::Theory => "theory",
            Self::Person => "person",
            Self::Event => "event",
        }
    }

    /// Plural table name used for exports (`people`, `theories`, ...).
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Location => "locations",
            Self::Episode => "episodes",
            Self::Artifact => "artifacts",
            Self::Borehole => "boreholes",
            Self::Interval => "borehole_intervals",
            Self::Measurement => "measurements",
            Self::Theory => "theories",
            Self::Person => "people",
            Self::Event => "events",
        }
    }

    /// Returns true if raw keys of this kind are structured rather than free text.
    #[must_use]
    pub const fn has_structured_key(self) -> bool {
        matches!(self, Self::Episode | Self::Interval)
    }

    /// Infers a kind from a source file name such as `people.jsonl` or
    /// `artifacts_summary.json`.
    #[must_use]
    pub fn from_file_stem(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_ascii_lowercase();
        if stem.starts_with("borehole_intervals") {
            return Some(Self::Interval);
        }
        let head = stem.split(['_', '-', '.']).next().unwrap_or(&stem);
        match head {
            "locations" | "location" => Some(Self::Location),
            "episodes" | "episode" => Some(Self::Episode),
            "artifacts" | "artifact" => Some(Self::Artifact),
            "boreholes" | "borehole" => Some(Self::Borehole),
            "intervals" | "interval" => Some(Self::Interval),
            "measurements" | "measurement" => Some(Self::Measurement),
            "theories" | "theory" => Some(Self::Theory),
            "people" | "persons" | "person" => Some(Self::Person),
            "events" | "event" => Some(Self::Event),
            _ => None,
        }
    }
}

impl TryFrom<String> for EntityKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err("entity kind cannot be empty".to_string());
        }
        Self::ALL
            .into_iter()
            .find(|k| value.eq_ignore_ascii_case(k.as_str()))
            .ok_or_else(|| {
                format!(
                    "unknown entity kind: {value}. Use one of location, episode, artifact, borehole, interval, measurement, theory, person, event"
                )
            })
    }
}

impl From<EntityKind> for String {
    fn from(value: EntityKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serde_is_string() {
        let person = serde_json::to_value(EntityKind::Person).unwrap();
        assert_eq!(person, serde_json::Value::String("person".to_string()));

        let parsed: EntityKind = serde_json::from_str("\"Borehole\"").unwrap();
        assert_eq!(parsed, EntityKind::Borehole);

        let unknown: Result<EntityKind, _> = serde_json::from_str("\"peron\"");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_kind_from_file_stem() {
        assert_eq!(
            EntityKind::from_file_stem(Path::new("facts/people.jsonl")),
            Some(EntityKind::Person)
        );
        assert_eq!(
            EntityKind::from_file_stem(Path::new("docs/data/artifacts_summary.json")),
            Some(EntityKind::Artifact)
        );
        assert_eq!(
            EntityKind::from_file_stem(Path::new("borehole_intervals.csv")),
            Some(EntityKind::Interval)
        );
        assert_eq!(EntityKind::from_file_stem(Path::new("oak_island_data.json")), None);
    }

    #[test]
    fn test_structured_keys() {
        assert!(EntityKind::Episode.has_structured_key());
        assert!(EntityKind::Interval.has_structured_key());
        assert!(!EntityKind::Person.has_structured_key());
    }
}
