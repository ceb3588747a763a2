//! Mention ledger rows.
//!
//! Every fact that resolves to an entity becomes exactly one immutable
//! `MentionRecord`. Rows are never merged or deduplicated; aggregate
//! statistics are a fold over them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::confidence::Confidence;
use crate::fact::{Fact, RawKey};
use crate::kind::EntityKind;

/// Identifier of one ingestion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One historical link between a canonical entity and a fact that mentioned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MentionRecord {
    /// Position in the ledger, assigned by the store on append.
    pub sequence: u64,
    pub kind: EntityKind,
    pub canonical_key: String,
    pub raw_key: RawKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub confidence: Confidence,
    pub source_ref: String,
    pub run_id: RunId,
    /// Content digest of the fact, stable across runs.
    pub fact_digest: String,
    pub recorded_at: DateTime<Utc>,
}

impl MentionRecord {
    /// Builds the row for `fact` resolved to `canonical_key`. The sequence is
    /// left at zero until the ledger assigns one.
    #[must_use]
    pub fn from_fact(canonical_key: &str, fact: &Fact, run_id: RunId) -> Self {
        Self {
            sequence: 0,
            kind: fact.kind,
            canonical_key: canonical_key.to_string(),
            raw_key: fact.raw_key.clone(),
            season: fact.context.season,
            episode: fact.context.episode,
            timestamp: fact.context.timestamp.clone(),
            text: fact.context.text.clone(),
            confidence: fact.confidence,
            source_ref: fact.provenance.source_ref(),
            run_id,
            fact_digest: fact_digest(fact),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct DigestView<'a> {
    kind: EntityKind,
    raw_key: &'a RawKey,
    attributes: &'a crate::fact::Attributes,
    confidence: Confidence,
    source_ref: String,
    context: &'a crate::fact::MentionContext,
}

/// blake3 digest of a fact's content.
///
/// Covers everything except `observed_at`, so re-extracting the same
/// observation in a later run yields the same digest.
#[must_use]
pub fn fact_digest(fact: &Fact) -> String {
    let view = DigestView {
        kind: fact.kind,
        raw_key: &fact.raw_key,
        attributes: &fact.attributes,
        confidence: fact.confidence,
        source_ref: fact.provenance.source_ref(),
        context: &fact.context,
    };
    // Attribute maps are ordered, so the encoding is canonical.
    let bytes = serde_json::to_vec(&view).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
