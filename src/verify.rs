//! Post-ingestion data-quality checks.
//!
//! Read-only. Findings are reported, never repaired: an orphan mention or a
//! repeated fingerprint is evidence of how the store was written, and the
//! ledger is append-only.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate;
use crate::identity::episode_key;
use crate::kind::EntityKind;
use crate::storage::{CanonicalStore, MentionLedger, StorageError};

/// Findings listed per check before the rest are only counted.
const MAX_LISTED: usize = 20;

/// Entities and mentions of one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupRatio {
    pub entities: usize,
    pub mentions: usize,
    /// Mentions per entity.
    pub ratio: f64,
    /// Share of mentions that did not create a new entity, in percent.
    pub savings_pct: f64,
}

impl DedupRatio {
    fn new(entities: usize, mentions: usize) -> Self {
        let ratio = mentions as f64 / entities.max(1) as f64;
        let savings_pct = if mentions == 0 {
            0.0
        } else {
            (1.0 - entities as f64 / mentions as f64) * 100.0
        };
        Self {
            entities,
            mentions,
            ratio,
            savings_pct,
        }
    }
}

/// A mention whose canonical key has no entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanMention {
    pub kind: EntityKind,
    pub canonical_key: String,
    pub sequence: u64,
}

/// An entity whose recomputed mention count disagrees with its ledger rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountMismatch {
    pub kind: EntityKind,
    pub canonical_key: String,
    pub recomputed: u64,
    pub ledger_rows: u64,
}

/// A fact fingerprint recorded more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepeatedDigest {
    pub kind: EntityKind,
    pub canonical_key: String,
    pub fact_digest: String,
    pub occurrences: usize,
    /// Ingestion runs the repeats came from.
    pub runs: usize,
}

/// Everything `verify` found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub dedup: BTreeMap<EntityKind, DedupRatio>,
    pub orphan_mentions: usize,
    pub orphans: Vec<OrphanMention>,
    pub count_mismatches: Vec<CountMismatch>,
    /// Entities with no mention at all.
    pub unmentioned_entities: usize,
    /// Event mentions placed in an episode the store has no entity for.
    pub events_without_episode: usize,
    pub repeated_digests: usize,
    pub repeats: Vec<RepeatedDigest>,
}

impl VerifyReport {
    /// Returns true if the store is internally consistent.
    ///
    /// Repeated digests and unmentioned entities are informational: the
    /// ledger never deduplicates, and manual sources may describe entities
    /// no subtitle mentions.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.orphan_mentions == 0 && self.count_mismatches.is_empty()
    }
}

/// Runs every check against the stores.
///
/// # Errors
///
/// Returns a storage error if either store cannot be read.
pub fn verify(canonical: &dyn CanonicalStore, ledger: &dyn MentionLedger) -> Result<VerifyReport, StorageError> {
    let mut report = VerifyReport::default();
    let episodes: BTreeSet<String> = canonical
        .list(EntityKind::Episode)?
        .into_iter()
        .map(|e| e.canonical_key)
        .collect();

    for kind in EntityKind::ALL {
        let entities: BTreeSet<String> = canonical
            .list(kind)?
            .into_iter()
            .map(|e| e.canonical_key)
            .collect();
        let rows = ledger.mentions(kind)?;
        if entities.is_empty() && rows.is_empty() {
            continue;
        }
        report.dedup.insert(kind, DedupRatio::new(entities.len(), rows.len()));

        let mut per_key: BTreeMap<&str, u64> = BTreeMap::new();
        let mut digests: HashMap<(&str, &str), (usize, BTreeSet<_>)> = HashMap::new();
        for row in &rows {
            *per_key.entry(row.canonical_key.as_str()).or_insert(0) += 1;
            let seen = digests
                .entry((row.canonical_key.as_str(), row.fact_digest.as_str()))
                .or_insert_with(|| (0, BTreeSet::new()));
            seen.0 += 1;
            seen.1.insert(row.run_id);

            if !entities.contains(&row.canonical_key) {
                report.orphan_mentions += 1;
                if report.orphans.len() < MAX_LISTED {
                    report.orphans.push(OrphanMention {
                        kind,
                        canonical_key: row.canonical_key.clone(),
                        sequence: row.sequence,
                    });
                }
            }
            if kind == EntityKind::Event {
                if let (Some(s), Some(e)) = (row.season, row.episode) {
                    if !episodes.contains(&episode_key(s, e)) {
                        report.events_without_episode += 1;
                    }
                }
            }
        }

        for (key, stats) in aggregate::fold(&rows) {
            let ledger_rows = ledger.mentions_for(kind, &key)?.len() as u64;
            if stats.mention_count != ledger_rows {
                report.count_mismatches.push(CountMismatch {
                    kind,
                    canonical_key: key,
                    recomputed: stats.mention_count,
                    ledger_rows,
                });
            }
        }
        report.unmentioned_entities += entities
            .iter()
            .filter(|key| !per_key.contains_key(key.as_str()))
            .count();

        let mut repeats: Vec<RepeatedDigest> = digests
            .into_iter()
            .filter(|(_, (n, _))| *n > 1)
            .map(|((key, digest), (occurrences, runs))| RepeatedDigest {
                kind,
                canonical_key: key.to_string(),
                fact_digest: digest.to_string(),
                occurrences,
                runs: runs.len(),
            })
            .collect();
        repeats.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then_with(|| a.canonical_key.cmp(&b.canonical_key))
                .then_with(|| a.fact_digest.cmp(&b.fact_digest))
        });
        report.repeated_digests += repeats.len();
        let room = MAX_LISTED.saturating_sub(report.repeats.len());
        report.repeats.extend(repeats.into_iter().take(room));
    }

    for (kind, dedup) in &report.dedup {
        info!(
            kind = %kind,
            entities = dedup.entities,
            mentions = dedup.mentions,
            ratio = dedup.ratio,
            "dedup ratio"
        );
    }
    if !report.is_consistent() {
        warn!(
            orphans = report.orphan_mentions,
            mismatches = report.count_mismatches.len(),
            "store is inconsistent"
        );
    }
    if report.repeated_digests > 0 {
        warn!(
            repeated = report.repeated_digests,
            "identical facts recorded more than once; inputs may have been ingested twice"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entity::CanonicalEntity;
    use crate::fact::{Fact, MentionContext, RawKey};
    use crate::ledger::{MentionRecord, RunId};
    use crate::source::{OriginKind, Provenance};
    use crate::storage::{InMemoryCanonicalStore, InMemoryMentionLedger};

    fn fact(kind: EntityKind, raw: &str, context: MentionContext) -> Fact {
        Fact::builder(kind, RawKey::text(raw))
            .provenance(Provenance::new(OriginKind::Subtitle, "s01e01.jsonl").at_line(2))
            .context(context)
            .build()
            .unwrap()
    }

    #[test]
    fn test_clean_store() {
        let canonical = InMemoryCanonicalStore::new();
        let ledger = InMemoryMentionLedger::new();
        canonical
            .upsert(EntityKind::Person, CanonicalEntity::empty(EntityKind::Person, "rick_lagina", Utc::now()))
            .unwrap();
        let run = RunId::new();
        for line in 0..4 {
            let f = Fact::builder(EntityKind::Person, RawKey::text("Rick"))
                .provenance(Provenance::new(OriginKind::Subtitle, "a").at_line(line))
                .build()
                .unwrap();
            ledger.record_fact("rick_lagina", &f, run).unwrap();
        }

        let report = verify(&canonical, &ledger).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.repeated_digests, 0);
        let people = &report.dedup[&EntityKind::Person];
        assert_eq!(people.entities, 1);
        assert_eq!(people.mentions, 4);
        assert!((people.ratio - 4.0).abs() < f64::EPSILON);
        assert!((people.savings_pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_orphans_and_repeats_are_reported() {
        let canonical = InMemoryCanonicalStore::new();
        let ledger = InMemoryMentionLedger::new();
        let f = fact(EntityKind::Person, "Rick", MentionContext::default());
        ledger.record_fact("rick_lagina", &f, RunId::new()).unwrap();
        ledger.record_fact("rick_lagina", &f, RunId::new()).unwrap();

        let report = verify(&canonical, &ledger).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(report.orphan_mentions, 2);
        assert_eq!(report.orphans[0].canonical_key, "rick_lagina");
        assert_eq!(report.repeated_digests, 1);
        assert_eq!(report.repeats[0].occurrences, 2);
        assert_eq!(report.repeats[0].runs, 2);
    }

    #[test]
    fn test_events_without_episode() {
        let canonical = InMemoryCanonicalStore::new();
        let ledger = InMemoryMentionLedger::new();
        canonical
            .upsert(EntityKind::Event, CanonicalEntity::empty(EntityKind::Event, "dig", Utc::now()))
            .unwrap();
        canonical
            .upsert(EntityKind::Episode, CanonicalEntity::empty(EntityKind::Episode, "s01e01", Utc::now()))
            .unwrap();
        let run = RunId::new();
        ledger
            .record(MentionRecord::from_fact("dig", &fact(EntityKind::Event, "dig", MentionContext::in_episode(1, 1)), run))
            .unwrap();
        ledger
            .record(MentionRecord::from_fact("dig", &fact(EntityKind::Event, "dig", MentionContext::in_episode(4, 2)), run))
            .unwrap();

        let report = verify(&canonical, &ledger).unwrap();
        assert_eq!(report.events_without_episode, 1);
        assert_eq!(report.unmentioned_entities, 1);
        assert!(report.is_consistent());
    }
}
