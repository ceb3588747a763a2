//! Canonical entities.
//!
//! A canonical entity is the deduplicated record for one real-world thing.
//! Its attributes are a view derived by merging facts; the mention ledger,
//! not this record, is the source of truth for how often it was mentioned.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::fact::KindSchema;
use crate::identity::title_case;
use crate::kind::EntityKind;
use crate::value::Value;

/// The deduplicated, addressable record for one real-world thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub kind: EntityKind,
    pub canonical_key: String,
    /// Current best value per schema attribute.
    #[serde(default)]
    pub display_attributes: BTreeMap<String, Value>,
    /// Confidence of the value held for each schema attribute.
    #[serde(default)]
    pub confidence_by_attribute: BTreeMap<String, Confidence>,
    /// Attributes no schema declares, kept as observed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_confidence: BTreeMap<String, Confidence>,
    /// Provenance of every contributing fact. Never shrinks.
    #[serde(default)]
    pub source_refs: BTreeSet<String>,
    /// Every free-text raw key that resolved to this entity.
    #[serde(default)]
    pub observed_names: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalEntity {
    /// An entity with no attributes yet.
    #[must_use]
    pub fn empty(kind: EntityKind, canonical_key: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            canonical_key: canonical_key.into(),
            display_attributes: BTreeMap::new(),
            confidence_by_attribute: BTreeMap::new(),
            extra_attributes: BTreeMap::new(),
            extra_confidence: BTreeMap::new(),
            source_refs: BTreeSet::new(),
            observed_names: BTreeSet::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.display_attributes
            .get(name)
            .or_else(|| self.extra_attributes.get(name))
    }

    #[must_use]
    pub fn confidence_of(&self, name: &str) -> Option<Confidence> {
        self.confidence_by_attribute.get(name).copied()
    }

    /// Human-readable name: the `name` attribute when observed, else the
    /// title-cased key.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.display_attributes
            .get("name")
            .and_then(Value::to_text)
            .unwrap_or_else(|| title_case(&self.canonical_key))
    }

    /// Display attributes in export order: schema columns first, with a
    /// fallback `name` for kinds that carry one.
    #[must_use]
    pub fn export_attributes(&self) -> BTreeMap<String, Value> {
        let mut attrs = self.display_attributes.clone();
        if KindSchema::of(self.kind).has_name() && !attrs.contains_key("name") {
            attrs.insert("name".to_string(), Value::String(self.display_name()));
        }
        attrs
    }

    /// `source_refs` joined for flat formats.
    #[must_use]
    pub fn joined_source_refs(&self) -> String {
        self.source_refs
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(";")
    }
}
