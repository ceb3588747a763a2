//! Aggregate recomputation.
//!
//! Statistics are a fold over the mention ledger and nothing else. They are
//! never updated incrementally, so the same ledger always yields the same
//! numbers however many passes wrote it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::identity::episode_key;
use crate::kind::EntityKind;
use crate::ledger::MentionRecord;
use crate::storage::{MentionLedger, StorageError};

/// Per-entity summary derived from its mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub mention_count: u64,
    pub first_season: Option<u32>,
    pub last_season: Option<u32>,
    /// Earliest and latest episode key (`s01e02`) with a mention.
    pub first_episode: Option<String>,
    pub last_episode: Option<String>,
    /// Distinct places the entity was evidenced: one per (season, episode)
    /// for mentions with episode context, one per source otherwise.
    pub evidence_count: u64,
}

/// Evidence point of a single mention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Evidence {
    Episode(u32, Option<u32>),
    Source(String),
}

#[derive(Default)]
struct Accumulator {
    mentions: u64,
    seasons: Option<(u32, u32)>,
    episodes: Option<((u32, u32), (u32, u32))>,
    evidence: BTreeSet<Evidence>,
}

impl Accumulator {
    fn add(&mut self, row: &MentionRecord) {
        self.mentions += 1;
        match row.season {
            Some(season) => {
                self.seasons = Some(match self.seasons {
                    Some((lo, hi)) => (lo.min(season), hi.max(season)),
                    None => (season, season),
                });
                if let Some(episode) = row.episode {
                    let at = (season, episode);
                    self.episodes = Some(match self.episodes {
                        Some((lo, hi)) => (lo.min(at), hi.max(at)),
                        None => (at, at),
                    });
                }
                self.evidence.insert(Evidence::Episode(season, row.episode));
            }
            None => {
                self.evidence.insert(Evidence::Source(row.source_ref.clone()));
            }
        }
    }

    fn finish(self) -> AggregateStats {
        AggregateStats {
            mention_count: self.mentions,
            first_season: self.seasons.map(|(lo, _)| lo),
            last_season: self.seasons.map(|(_, hi)| hi),
            first_episode: self.episodes.map(|((s, e), _)| episode_key(s, e)),
            last_episode: self.episodes.map(|(_, (s, e))| episode_key(s, e)),
            evidence_count: self.evidence.len() as u64,
        }
    }
}

/// Folds ledger rows into per-key statistics. Row order does not matter.
#[must_use]
pub fn fold<'a, I>(rows: I) -> BTreeMap<String, AggregateStats>
where
    I: IntoIterator<Item = &'a MentionRecord>,
{
    let mut acc: BTreeMap<String, Accumulator> = BTreeMap::new();
    for row in rows {
        acc.entry(row.canonical_key.clone()).or_default().add(row);
    }
    acc.into_iter().map(|(key, a)| (key, a.finish())).collect()
}

/// Statistics for every entity of `kind` with at least one mention.
pub fn recompute(
    ledger: &dyn MentionLedger,
    kind: EntityKind,
) -> Result<BTreeMap<String, AggregateStats>, StorageError> {
    Ok(fold(&ledger.mentions(kind)?))
}

/// Statistics for every kind, keyed by kind then canonical key.
pub type AggregateTable = BTreeMap<EntityKind, BTreeMap<String, AggregateStats>>;

/// Rebuilds the statistics of every kind from scratch.
pub fn recompute_all(ledger: &dyn MentionLedger) -> Result<AggregateTable, StorageError> {
    let mut table = AggregateTable::new();
    for kind in EntityKind::ALL {
        let stats = recompute(ledger, kind)?;
        if !stats.is_empty() {
            info!(kind = %kind, entities = stats.len(), "rebuilt aggregates");
            table.insert(kind, stats);
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Fact, MentionContext, RawKey};
    use crate::ledger::RunId;
    use crate::source::{OriginKind, Provenance};
    use crate::storage::InMemoryMentionLedger;

    fn mention(key: &str, season: Option<u32>, episode: Option<u32>, file: &str) -> MentionRecord {
        let fact = Fact::builder(EntityKind::Person, RawKey::text(key))
            .provenance(Provenance::new(OriginKind::Subtitle, file))
            .context(MentionContext {
                season,
                episode,
                ..MentionContext::default()
            })
            .build()
            .unwrap();
        MentionRecord::from_fact(key, &fact, RunId::new())
    }

    #[test]
    fn test_fold_tracks_seasons_and_evidence() {
        let rows = vec![
            mention("rick_lagina", Some(3), Some(4), "a"),
            mention("rick_lagina", Some(1), Some(2), "a"),
            mention("rick_lagina", Some(1), Some(2), "b"),
            mention("rick_lagina", Some(5), None, "c"),
            mention("rick_lagina", None, None, "manual.json"),
            mention("marty_lagina", Some(2), Some(1), "a"),
        ];
        let stats = fold(&rows);

        let rick = &stats["rick_lagina"];
        assert_eq!(rick.mention_count, 5);
        assert_eq!(rick.first_season, Some(1));
        assert_eq!(rick.last_season, Some(5));
        assert_eq!(rick.first_episode.as_deref(), Some("s01e02"));
        assert_eq!(rick.last_episode.as_deref(), Some("s03e04"));
        // s01e02, s03e04, season 5, manual.json
        assert_eq!(rick.evidence_count, 4);

        assert_eq!(stats["marty_lagina"].mention_count, 1);
    }

    #[test]
    fn test_no_context_leaves_seasons_empty() {
        let stats = fold(&[mention("templar", None, None, "manual.json")]);
        let templar = &stats["templar"];
        assert_eq!(templar.first_season, None);
        assert_eq!(templar.first_episode, None);
        assert_eq!(templar.evidence_count, 1);
    }

    #[test]
    fn test_recompute_is_order_independent_and_repeatable() {
        let mut rows = vec![
            mention("rick_lagina", Some(2), Some(1), "a"),
            mention("rick_lagina", Some(1), Some(9), "b"),
            mention("rick_lagina", None, None, "c"),
        ];
        let forward = fold(&rows);
        rows.reverse();
        assert_eq!(fold(&rows), forward);

        let ledger = InMemoryMentionLedger::new();
        for row in rows {
            ledger.record(row).unwrap();
        }
        let first = recompute_all(&ledger).unwrap();
        let second = recompute_all(&ledger).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[&EntityKind::Person], forward);
        assert!(!first.contains_key(&EntityKind::Theory));
    }
}
