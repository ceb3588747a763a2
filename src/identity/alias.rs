//! Injectable alias tables.
//!
//! An alias table maps exact observed names to canonical keys. It is
//! authoritative: an alias hit wins over any similarity score. Tables are
//! plain values handed to the resolver, so several resolution policies can
//! coexist in one process.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::identity::slug::normalize;
use crate::kind::EntityKind;

/// Category given to theories the table does not know.
pub const UNKNOWN_THEORY_CATEGORY: &str = "other";

const KNOWN_PEOPLE: &[(&str, &[&str])] = &[
    ("rick_lagina", &["Rick", "Rick Lagina"]),
    ("marty_lagina", &["Marty", "Marty Lagina"]),
    ("gary_drayton", &["Gary", "Gary Drayton"]),
    ("craig_tester", &["Craig", "Craig Tester"]),
    ("jack_begley", &["Jack", "Jack Begley"]),
    ("dave_blond", &["Dave", "Dave Blond"]),
    ("dan_blankenship", &["Dan", "Dan Blankenship"]),
    ("alex_lagina", &["Alex", "Alex Lagina"]),
    ("laird_niven", &["Laird", "Laird Niven"]),
    ("charles_barkhouse", &["Charles", "Charles Barkhouse"]),
    ("doug_crowell", &["Doug", "Doug Crowell"]),
    ("matty_blake", &["Matty", "Matty Blake"]),
];

const KNOWN_THEORIES: &[(&str, &str)] = &[
    ("treasure", "treasure"),
    ("templar_cross", "religious"),
    ("templar", "religious"),
    ("french", "historical"),
    ("nolan_cross", "historical"),
    ("spanish", "historical"),
    ("british", "historical"),
    ("zena_map", "historical"),
    ("pirates", "historical"),
    ("roman", "historical"),
];

/// One canonical entity known in advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub canonical_key: String,
    /// Observed spellings that map to this key.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Classification carried onto the entity (theory categories).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl AliasEntry {
    #[must_use]
    pub fn new(canonical_key: impl Into<String>, aliases: &[&str]) -> Self {
        Self {
            canonical_key: canonical_key.into(),
            aliases: aliases.iter().map(|a| (*a).to_string()).collect(),
            category: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Alias table keyed by entity kind.
///
/// On disk this is a JSON object from kind name to a list of entries:
///
/// ```json
/// { "person": [ { "canonical_key": "rick_lagina", "aliases": ["Rick", "Rick Lagina"] } ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<EntityKind, Vec<AliasEntry>>", into = "BTreeMap<EntityKind, Vec<AliasEntry>>")]
pub struct AliasTable {
    entries: BTreeMap<EntityKind, Vec<AliasEntry>>,
    index: BTreeMap<(EntityKind, String), String>,
}

impl AliasTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in people and theories of the documentary series.
    #[must_use]
    pub fn documentary_defaults() -> Self {
        let mut table = Self::new();
        for &(key, aliases) in KNOWN_PEOPLE {
            table.insert(EntityKind::Person, AliasEntry::new(key, aliases));
        }
        for &(key, category) in KNOWN_THEORIES {
            let spaced = key.replace('_', " ");
            table.insert(
                EntityKind::Theory,
                AliasEntry::new(key, &[key, spaced.as_str()]).with_category(category),
            );
        }
        table
    }

    /// Loads a table from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the file cannot be read or
    /// is not a valid alias table.
    pub fn from_json_file(path: &Path) -> Result<Self, ValidationError> {
        let bytes = std::fs::read(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("cannot read alias file {}: {e}", path.display()),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("invalid alias file {}: {e}", path.display()),
        })
    }

    /// Adds an entry. Later entries override earlier ones for the same alias.
    pub fn insert(&mut self, kind: EntityKind, entry: AliasEntry) {
        self.index_entry(kind, &entry);
        self.entries.entry(kind).or_default().push(entry);
    }

    /// Layers `other` on top of this table.
    pub fn extend(&mut self, other: Self) {
        for (kind, entries) in other.entries {
            for entry in entries {
                self.insert(kind, entry);
            }
        }
    }

    fn index_entry(&mut self, kind: EntityKind, entry: &AliasEntry) {
        for alias in entry.aliases.iter().chain(std::iter::once(&entry.canonical_key)) {
            let normalized = normalize(alias);
            if !normalized.is_empty() {
                self.index
                    .insert((kind, normalized), entry.canonical_key.clone());
            }
        }
    }

    /// Exact lookup of an observed name (case and whitespace insensitive).
    #[must_use]
    pub fn lookup(&self, kind: EntityKind, raw: &str) -> Option<&str> {
        self.index.get(&(kind, normalize(raw))).map(String::as_str)
    }

    /// Category declared for a canonical key, if any.
    #[must_use]
    pub fn category(&self, kind: EntityKind, canonical_key: &str) -> Option<&str> {
        self.entries
            .get(&kind)?
            .iter()
            .rev()
            .find(|e| e.canonical_key == canonical_key)
            .and_then(|e| e.category.as_deref())
    }

    pub fn entries(&self, kind: EntityKind) -> &[AliasEntry] {
        self.entries.get(&kind).map_or(&[][..], Vec::as_slice)
    }

    /// All `(alias, canonical_key)` pairs of a kind, in normalized form.
    pub fn known_names(&self, kind: EntityKind) -> impl Iterator<Item = (&str, &str)> {
        self.index
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|((_, name), key)| (name.as_str(), key.as_str()))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl From<BTreeMap<EntityKind, Vec<AliasEntry>>> for AliasTable {
    fn from(entries: BTreeMap<EntityKind, Vec<AliasEntry>>) -> Self {
        let mut table = Self::new();
        for (kind, list) in entries {
            for entry in list {
                table.insert(kind, entry);
            }
        }
        table
    }
}

impl From<AliasTable> for BTreeMap<EntityKind, Vec<AliasEntry>> {
    fn from(table: AliasTable) -> Self {
        table.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_first_names() {
        let table = AliasTable::documentary_defaults();
        assert_eq!(table.lookup(EntityKind::Person, "Rick"), Some("rick_lagina"));
        assert_eq!(table.lookup(EntityKind::Person, "  rick   LAGINA"), Some("rick_lagina"));
        assert_eq!(table.lookup(EntityKind::Person, "Dan"), Some("dan_blankenship"));
        assert_eq!(table.lookup(EntityKind::Theory, "Nolan Cross"), Some("nolan_cross"));
        assert_eq!(table.lookup(EntityKind::Location, "Rick"), None);
    }

    #[test]
    fn test_theory_categories() {
        let table = AliasTable::documentary_defaults();
        assert_eq!(table.category(EntityKind::Theory, "templar_cross"), Some("religious"));
        assert_eq!(table.category(EntityKind::Theory, "treasure"), Some("treasure"));
        assert_eq!(table.category(EntityKind::Theory, "atlantis"), None);
    }

    #[test]
    fn test_json_round_trip_rebuilds_index() {
        let json = r#"{"person": [{"canonical_key": "paul_troutman", "aliases": ["Paul", "Paul Troutman"]}]}"#;
        let table: AliasTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.lookup(EntityKind::Person, "paul"), Some("paul_troutman"));

        let text = serde_json::to_string(&table).unwrap();
        let again: AliasTable = serde_json::from_str(&text).unwrap();
        assert_eq!(again, table);
    }

    #[test]
    fn test_extend_overrides() {
        let mut table = AliasTable::documentary_defaults();
        let mut local = AliasTable::new();
        local.insert(EntityKind::Person, AliasEntry::new("dan_henskee", &["Dan"]));
        table.extend(local);
        assert_eq!(table.lookup(EntityKind::Person, "Dan"), Some("dan_henskee"));
        assert_eq!(table.lookup(EntityKind::Person, "Dan Blankenship"), Some("dan_blankenship"));
    }

    #[test]
    fn test_from_missing_file() {
        let err = AliasTable::from_json_file(Path::new("/nonexistent/aliases.json")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidConfig { .. }));
    }
}
