//! Facts: immutable observations produced by extractors.

pub mod attributes;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Confidence;
use crate::error::ValidationError;
use crate::kind::EntityKind;
use crate::source::Provenance;
use crate::value::Value;

pub use attributes::{Attributes, FieldSpec, FieldType, KindSchema};

/// The identifier a fact uses for its subject, as observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawKey {
    /// Free text: a spoken name, a borehole code
    Text { text: String },
    /// An episode addressed by its position in the series
    Episode { season: u32, episode: u32 },
    /// A depth interval within a borehole, in metres
    Interval { borehole: String, from_m: f64, to_m: f64 },
}

impl RawKey {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    #[must_use]
    pub const fn episode(season: u32, episode: u32) -> Self {
        Self::Episode { season, episode }
    }

    #[must_use]
    pub fn interval(borehole: impl Into<String>, from_m: f64, to_m: f64) -> Self {
        Self::Interval {
            borehole: borehole.into(),
            from_m,
            to_m,
        }
    }

    /// Returns the free text if this key is not structured.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_structured(&self) -> bool {
        !matches!(self, Self::Text { .. })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let empty = match self {
            Self::Text { text } => text.trim().is_empty(),
            Self::Episode { .. } => false,
            Self::Interval { borehole, from_m, to_m } => {
                borehole.trim().is_empty() || !from_m.is_finite() || !to_m.is_finite()
            }
        };
        if empty {
            return Err(ValidationError::EmptyRawKey);
        }
        Ok(())
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { text } => f.write_str(text),
            Self::Episode { season, episode } => write!(f, "S{season:02}E{episode:02}"),
            Self::Interval { borehole, from_m, to_m } => write!(f, "{borehole} {from_m}-{to_m}m"),
        }
    }
}

/// Where in the series a mention occurred.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MentionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    /// Intra-episode timestamp as printed by the source (`00:12:31,400`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// The observed text snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl MentionContext {
    #[must_use]
    pub const fn in_episode(season: u32, episode: u32) -> Self {
        Self {
            season: Some(season),
            episode: Some(episode),
            timestamp: None,
            text: None,
        }
    }
}

/// An immutable observation about one entity.
///
/// # Examples
///
/// ```
/// use factfold::{Confidence, EntityKind, Fact, RawKey};
///
/// let fact = Fact::builder(EntityKind::Person, RawKey::text("Marty"))
///     .attribute("role", "narrator")
///     .confidence(Confidence::new(0.7).unwrap())
///     .build()
///     .unwrap();
/// assert_eq!(fact.attribute_map().get("name").and_then(|v| v.as_str()), Some("Marty"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub kind: EntityKind,
    pub raw_key: RawKey,
    pub attributes: Attributes,
    pub confidence: Confidence,
    pub provenance: Provenance,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub context: MentionContext,
}

impl Fact {
    #[must_use]
    pub fn builder(kind: EntityKind, raw_key: RawKey) -> FactBuilder {
        FactBuilder::new(kind, raw_key)
    }

    /// The schema attributes this fact contributes to its entity.
    ///
    /// Text-keyed facts of kinds that carry a display name contribute the
    /// raw key as `name` when they do not report one.
    #[must_use]
    pub fn attribute_map(&self) -> std::collections::BTreeMap<String, Value> {
        let mut map = self.attributes.fields.clone();
        if let Some(text) = self.raw_key.as_text() {
            if KindSchema::of(self.kind).has_name() && !map.contains_key("name") {
                map.insert("name".to_string(), Value::from(text.trim()));
            }
        }
        map
    }

    /// Every provenance string this fact contributes.
    #[must_use]
    pub fn source_refs(&self) -> Vec<String> {
        self.provenance.source_refs()
    }
}

/// Builder for [`Fact`].
#[derive(Debug)]
pub struct FactBuilder {
    kind: EntityKind,
    raw_key: RawKey,
    raw_attributes: Vec<(String, Value)>,
    confidence: Confidence,
    provenance: Provenance,
    observed_at: Option<DateTime<Utc>>,
    context: MentionContext,
}

impl FactBuilder {
    fn new(kind: EntityKind, raw_key: RawKey) -> Self {
        Self {
            kind,
            raw_key,
            raw_attributes: Vec::new(),
            confidence: Confidence::default(),
            provenance: Provenance::default(),
            observed_at: None,
            context: MentionContext::default(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.raw_attributes.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn attributes<I>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.raw_attributes.extend(attrs);
        self
    }

    #[must_use]
    pub const fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    #[must_use]
    pub const fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    #[must_use]
    pub fn context(mut self, context: MentionContext) -> Self {
        self.context = context;
        self
    }

    /// Builds the fact, coercing attributes through the kind's schema.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyRawKey` for a blank text key or an
    /// interval without a borehole or finite depths.
    pub fn build(self) -> Result<Fact, ValidationError> {
        self.raw_key.validate()?;
        let mut context = self.context;
        if let RawKey::Episode { season, episode } = self.raw_key {
            context.season.get_or_insert(season);
            context.episode.get_or_insert(episode);
        }
        Ok(Fact {
            kind: self.kind,
            attributes: Attributes::from_raw(self.kind, self.raw_attributes),
            raw_key: self.raw_key,
            confidence: self.confidence,
            provenance: self.provenance,
            observed_at: self.observed_at.unwrap_or_else(Utc::now),
            context,
        })
    }
}
