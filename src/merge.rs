//! Attribute merge engine.
//!
//! `merge(existing, fact)` folds one fact into a canonical entity. Rules are
//! applied per attribute:
//!
//! - an empty fact value contributes nothing;
//! - an unset attribute is filled regardless of confidence;
//! - a held value is replaced only by a strictly more confident fact, so on
//!   equal confidence the first-applied value stays;
//! - cumulative attributes (declared per kind) take the set union;
//! - `source_refs` and `observed_names` only ever grow.
//!
//! Applying the same fact twice leaves the entity as applying it once.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::confidence::Confidence;
use crate::entity::CanonicalEntity;
use crate::fact::{Fact, KindSchema};
use crate::value::Value;

/// What a merge did to the store's view of the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No entity existed under the key
    Inserted,
    /// At least one attribute, confidence, ref or name changed
    Updated,
    /// The fact added nothing new
    Unchanged,
}

impl MergeOutcome {
    pub const fn is_write(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Folds `fact` into `existing` (or a fresh entity under `canonical_key`).
#[must_use]
pub fn merge(
    existing: Option<CanonicalEntity>,
    canonical_key: &str,
    fact: &Fact,
) -> (CanonicalEntity, MergeOutcome) {
    let (mut entity, inserted) = match existing {
        Some(entity) => (entity, false),
        None => (
            CanonicalEntity::empty(fact.kind, canonical_key, fact.observed_at),
            true,
        ),
    };

    let schema = KindSchema::of(fact.kind);
    let mut changed = false;

    for (name, value) in fact.attribute_map() {
        let cumulative = schema.is_cumulative(&name);
        changed |= merge_slot(
            &mut entity.display_attributes,
            &mut entity.confidence_by_attribute,
            name,
            value,
            fact.confidence,
            cumulative,
        );
    }
    for (name, value) in &fact.attributes.extra {
        changed |= merge_slot(
            &mut entity.extra_attributes,
            &mut entity.extra_confidence,
            name.clone(),
            value.clone(),
            fact.confidence,
            false,
        );
    }

    for source_ref in fact.source_refs() {
        changed |= entity.source_refs.insert(source_ref);
    }
    if let Some(text) = fact.raw_key.as_text() {
        changed |= entity.observed_names.insert(text.trim().to_string());
    }

    if changed && fact.observed_at > entity.updated_at {
        entity.updated_at = fact.observed_at;
    }

    let outcome = if inserted {
        MergeOutcome::Inserted
    } else if changed {
        MergeOutcome::Updated
    } else {
        MergeOutcome::Unchanged
    };
    (entity, outcome)
}

/// Fills `name` only if it holds no value. Used for defaults such as theory
/// categories, which any observed value should override.
pub fn fill_if_absent(
    entity: &mut CanonicalEntity,
    name: &str,
    value: Value,
    confidence: Confidence,
) -> bool {
    let unset = entity
        .display_attributes
        .get(name)
        .map_or(true, Value::is_empty);
    if !unset || value.is_empty() {
        return false;
    }
    entity.display_attributes.insert(name.to_string(), value);
    entity
        .confidence_by_attribute
        .insert(name.to_string(), confidence);
    true
}

fn merge_slot(
    values: &mut BTreeMap<String, Value>,
    confidences: &mut BTreeMap<String, Confidence>,
    name: String,
    value: Value,
    confidence: Confidence,
    cumulative: bool,
) -> bool {
    if value.is_empty() {
        return false;
    }

    let held = values.get(&name).filter(|v| !v.is_empty());
    let Some(held) = held else {
        values.insert(name.clone(), normalize_incoming(value, cumulative));
        confidences.insert(name, confidence);
        return true;
    };

    if cumulative {
        let merged = union(held, &value);
        let stored = confidences.get(&name).copied().unwrap_or_else(Confidence::zero);
        let next_conf = stored.max(confidence);
        let changed = &merged != held || next_conf != stored;
        if changed {
            values.insert(name.clone(), merged);
            confidences.insert(name, next_conf);
        }
        return changed;
    }

    let stored = confidences.get(&name).copied().unwrap_or_else(Confidence::zero);
    if !confidence.beats(stored) {
        return false;
    }
    values.insert(name.clone(), value);
    confidences.insert(name, confidence);
    true
}

fn normalize_incoming(value: Value, cumulative: bool) -> Value {
    if cumulative {
        union(&Value::List(Vec::new()), &value)
    } else {
        value
    }
}

/// Sorted, duplicate-free union of two list (or scalar) values.
fn union(a: &Value, b: &Value) -> Value {
    let mut items: Vec<Value> = a
        .clone()
        .into_items()
        .into_iter()
        .chain(b.clone().into_items())
        .filter(|v| !v.is_empty())
        .collect();
    items.sort_by(Value::total_cmp);
    items.dedup_by(|x, y| x.total_cmp(y) == Ordering::Equal);
    Value::List(items)
}


#[cfg(test)]
mod proptests {
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    use super::*;
    use crate::fact::RawKey;
    use crate::kind::EntityKind;
    use crate::source::{OriginKind, Provenance};

    fn arb_fact() -> impl Strategy<Value = Fact> {
        (
            prop_oneof![Just("Rick"), Just("Rick Lagina"), Just("Marty")],
            "[a-z ]{0,12}",
            prop::option::of(-90.0f64..90.0),
            prop::collection::vec(1i64..12, 0..4),
            0u32..=100,
            "[a-z]{1,6}",
            1usize..50,
        )
            .prop_map(|(raw, role, lat, seasons, conf, file, line)| {
                let mut builder = Fact::builder(EntityKind::Person, RawKey::text(raw))
                    .attribute("role", role)
                    .attribute("related_seasons", Value::from(seasons))
                    .confidence(Confidence::lenient(Some(f64::from(conf) / 100.0)))
                    .provenance(Provenance::new(OriginKind::Subtitle, file).at_line(line))
                    .observed_at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
                if let Some(lat) = lat {
                    builder = builder.attribute("home_lat", lat);
                }
                builder.build().unwrap()
            })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(prior in prop::option::of(arb_fact()), fact in arb_fact()) {
            let existing = prior.map(|p| merge(None, "rick_lagina", &p).0);
            let (once, _) = merge(existing, "rick_lagina", &fact);
            let (twice, outcome) = merge(Some(once.clone()), "rick_lagina", &fact);
            prop_assert_eq!(outcome, MergeOutcome::Unchanged);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn distinct_confidences_are_order_independent(
            a in arb_fact(),
            b in arb_fact(),
        ) {
            prop_assume!(a.confidence != b.confidence);
            let (ab, _) = merge(Some(merge(None, "k", &a).0), "k", &b);
            let (ba, _) = merge(Some(merge(None, "k", &b).0), "k", &a);
            prop_assert_eq!(&ab.display_attributes, &ba.display_attributes);
            prop_assert_eq!(&ab.source_refs, &ba.source_refs);
        }
    }
}
