use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::fact::RawKey;
use crate::identity::alias::{AliasTable, UNKNOWN_THEORY_CATEGORY};
use crate::identity::similarity::{NormalizedLevenshtein, SimilarityScorer};
use crate::identity::slug::{self, DEFAULT_MAX_KEY_LEN};
use crate::kind::EntityKind;

/// Default similarity a candidate must strictly exceed to be reused.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.85;

/// Tunable parts of identity resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverPolicy {
    pub threshold: f64,
    pub max_key_len: usize,
    /// Kinds whose free-text keys may be matched by similarity. Other kinds
    /// only match exactly.
    pub fuzzy_kinds: BTreeSet<EntityKind>,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            fuzzy_kinds: [
                EntityKind::Person,
                EntityKind::Theory,
                EntityKind::Location,
                EntityKind::Artifact,
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// How a key was arrived at.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionMethod {
    /// Episode or interval key built from its parts
    Structured,
    /// Exact hit in the alias table
    Alias,
    /// Exact hit on a name already observed for an entity
    Known,
    /// Similarity above threshold
    Similar { score: f64, matched: String },
    /// New key derived from the raw text
    Derived,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub canonical_key: String,
    pub method: ResolutionMethod,
}

/// Maps `(kind, raw_key)` to a canonical key.
///
/// Precedence: alias table, then names already seen, then similarity above
/// the threshold, then slug derivation. Resolution never fails. Once a raw
/// key has been resolved, the same raw key resolves to the same canonical key
/// for the lifetime of the resolver.
#[derive(Debug)]
pub struct IdentityResolver {
    aliases: AliasTable,
    scorer: Arc<dyn SimilarityScorer>,
    policy: ResolverPolicy,
    /// Observed names per kind: normalized name -> canonical key
    known: HashMap<EntityKind, BTreeMap<String, String>>,
    mention_counts: HashMap<(EntityKind, String), u64>,
    memo: HashMap<(EntityKind, String), Resolution>,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(aliases: AliasTable, scorer: Arc<dyn SimilarityScorer>, policy: ResolverPolicy) -> Self {
        Self {
            aliases,
            scorer,
            policy,
            known: HashMap::new(),
            mention_counts: HashMap::new(),
            memo: HashMap::new(),
        }
    }

    /// Resolver over the given aliases with the default scorer and policy.
    #[must_use]
    pub fn with_aliases(aliases: AliasTable) -> Self {
        Self::new(aliases, Arc::new(NormalizedLevenshtein), ResolverPolicy::default())
    }

    pub fn policy(&self) -> &ResolverPolicy {
        &self.policy
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Registers an existing entity: its observed names become exact matches
    /// and its mention count takes part in tie-breaks.
    pub fn seed_entity<'a, I>(&mut self, kind: EntityKind, canonical_key: &str, names: I, mention_count: u64)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let known = self.known.entry(kind).or_default();
        for name in names {
            let normalized = slug::normalize(name);
            if !normalized.is_empty() {
                known
                    .entry(normalized)
                    .or_insert_with(|| canonical_key.to_string());
            }
        }
        let count = self
            .mention_counts
            .entry((kind, canonical_key.to_string()))
            .or_insert(0);
        *count = (*count).max(mention_count);
    }

    /// Number of resolutions to `canonical_key` so far, seeded counts included.
    #[must_use]
    pub fn mention_count(&self, kind: EntityKind, canonical_key: &str) -> u64 {
        self.mention_counts
            .get(&(kind, canonical_key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Category for a theory key: the alias table's, else `other`.
    #[must_use]
    pub fn theory_category(&self, canonical_key: &str) -> &str {
        self.aliases
            .category(EntityKind::Theory, canonical_key)
            .unwrap_or(UNKNOWN_THEORY_CATEGORY)
    }

    /// Resolves a raw key and counts one mention of the result.
    pub fn resolve(&mut self, kind: EntityKind, raw_key: &RawKey) -> Resolution {
        let resolution = match raw_key {
            RawKey::Episode { season, episode } => Resolution {
                canonical_key: slug::episode_key(*season, *episode),
                method: ResolutionMethod::Structured,
            },
            RawKey::Interval { borehole, from_m, to_m } => Resolution {
                canonical_key: slug::interval_key(borehole, *from_m, *to_m),
                method: ResolutionMethod::Structured,
            },
            RawKey::Text { text } => self.resolve_text(kind, text),
        };
        *self
            .mention_counts
            .entry((kind, resolution.canonical_key.clone()))
            .or_insert(0) += 1;
        resolution
    }

    fn resolve_text(&mut self, kind: EntityKind, raw: &str) -> Resolution {
        let normalized = slug::normalize(raw);
        let memo_key = (kind, normalized.clone());
        if let Some(hit) = self.memo.get(&memo_key) {
            return hit.clone();
        }

        let resolution = self.lookup_text(kind, raw, &normalized);
        debug!(
            kind = %kind,
            raw_key = raw,
            canonical_key = %resolution.canonical_key,
            method = ?resolution.method,
            "resolved identity"
        );

        if !normalized.is_empty() {
            self.known
                .entry(kind)
                .or_default()
                .entry(normalized)
                .or_insert_with(|| resolution.canonical_key.clone());
        }
        self.memo.insert(memo_key, resolution.clone());
        resolution
    }

    fn lookup_text(&self, kind: EntityKind, raw: &str, normalized: &str) -> Resolution {
        if let Some(key) = self.aliases.lookup(kind, normalized) {
            return Resolution {
                canonical_key: key.to_string(),
                method: ResolutionMethod::Alias,
            };
        }
        if let Some(key) = self.known.get(&kind).and_then(|k| k.get(normalized)) {
            return Resolution {
                canonical_key: key.clone(),
                method: ResolutionMethod::Known,
            };
        }
        if self.policy.fuzzy_kinds.contains(&kind) && !normalized.is_empty() {
            if let Some(resolution) = self.best_similar(kind, raw, normalized) {
                return resolution;
            }
        }
        Resolution {
            canonical_key: slug::slugify(kind, raw, self.policy.max_key_len),
            method: ResolutionMethod::Derived,
        }
    }

    fn best_similar(&self, kind: EntityKind, raw: &str, normalized: &str) -> Option<Resolution> {
        let observed = self
            .known
            .get(&kind)
            .into_iter()
            .flat_map(|names| names.iter().map(|(n, k)| (n.as_str(), k.as_str())));
        let candidates = self.aliases.known_names(kind).chain(observed);

        let mut best_score = self.policy.threshold;
        // Best-scoring key -> the name that produced its score.
        let mut tied: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, key) in candidates {
            let score = self.scorer.score(normalized, name);
            if score > best_score {
                best_score = score;
                tied.clear();
                tied.insert(key, name);
            } else if score == best_score && !tied.is_empty() {
                tied.entry(key).or_insert(name);
            }
        }

        if tied.is_empty() {
            return None;
        }

        // Richest entity wins; equal counts fall back to the smallest key.
        let mut ranked: Vec<(&str, &str, u64)> = tied
            .iter()
            .map(|(key, name)| (*key, *name, self.mention_count(kind, key)))
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(b.0)));
        let (key, name, count) = ranked[0];

        if ranked.len() > 1 {
            let settled_by_count = ranked[1].2 < count;
            warn!(
                target: "factfold::audit",
                kind = %kind,
                raw_key = raw,
                score = best_score,
                candidates = ?ranked.iter().map(|r| r.0).collect::<Vec<_>>(),
                chosen = key,
                settled_by_count,
                "ambiguous identity"
            );
        }

        Some(Resolution {
            canonical_key: key.to_string(),
            method: ResolutionMethod::Similar {
                score: best_score,
                matched: name.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::alias::AliasEntry;

    fn text(s: &str) -> RawKey {
        RawKey::text(s)
    }

    #[test]
    fn test_alias_precedence() {
        let mut r = IdentityResolver::with_aliases(AliasTable::documentary_defaults());
        assert_eq!(r.resolve(EntityKind::Person, &text("Rick")).canonical_key, "rick_lagina");
        let res = r.resolve(EntityKind::Person, &text("Rick Lagina"));
        assert_eq!(res.canonical_key, "rick_lagina");
        assert_eq!(res.method, ResolutionMethod::Alias);
        assert_eq!(r.mention_count(EntityKind::Person, "rick_lagina"), 2);
    }

    #[test]
    fn test_transcription_variant_is_collapsed() {
        let mut r = IdentityResolver::with_aliases(AliasTable::documentary_defaults());
        let res = r.resolve(EntityKind::Person, &text("Rick Lagna"));
        assert_eq!(res.canonical_key, "rick_lagina");
        assert!(matches!(res.method, ResolutionMethod::Similar { .. }));
    }

    #[test]
    fn test_unknown_name_derives_slug_and_is_remembered() {
        let mut r = IdentityResolver::with_aliases(AliasTable::new());
        let first = r.resolve(EntityKind::Person, &text("Terry Matheson"));
        assert_eq!(first.canonical_key, "terry_matheson");
        assert_eq!(first.method, ResolutionMethod::Derived);

        let variant = r.resolve(EntityKind::Person, &text("Terry Mathesen"));
        assert_eq!(variant.canonical_key, "terry_matheson");

        let again = r.resolve(EntityKind::Person, &text("terry  matheson"));
        assert_eq!(again.canonical_key, "terry_matheson");
    }

    #[test]
    fn test_exact_only_kinds_skip_similarity() {
        let mut r = IdentityResolver::with_aliases(AliasTable::new());
        assert_eq!(r.resolve(EntityKind::Borehole, &text("H8")).canonical_key, "h8");
        assert_eq!(r.resolve(EntityKind::Borehole, &text("H9")).canonical_key, "h9");
    }

    #[test]
    fn test_structured_keys() {
        let mut r = IdentityResolver::with_aliases(AliasTable::new());
        let ep = r.resolve(EntityKind::Episode, &RawKey::episode(4, 1));
        assert_eq!(ep.canonical_key, "s04e01");
        assert_eq!(ep.method, ResolutionMethod::Structured);
        let iv = r.resolve(EntityKind::Interval, &RawKey::interval("10X", 30.0, 32.5));
        assert_eq!(iv.canonical_key, "10x_30p0_32p5");
    }

    #[test]
    fn test_threshold_must_be_exceeded() {
        #[derive(Debug)]
        struct Fixed(f64);
        impl SimilarityScorer for Fixed {
            fn score(&self, _: &str, _: &str) -> f64 {
                self.0
            }
            fn name(&self) -> &'static str {
                "fixed"
            }
        }

        let mut aliases = AliasTable::new();
        aliases.insert(EntityKind::Person, AliasEntry::new("paul_troutman", &["Paul Troutman"]));

        let mut at = IdentityResolver::new(aliases.clone(), Arc::new(Fixed(0.85)), ResolverPolicy::default());
        assert_eq!(at.resolve(EntityKind::Person, &text("Someone")).canonical_key, "someone");

        let mut above = IdentityResolver::new(aliases, Arc::new(Fixed(0.86)), ResolverPolicy::default());
        assert_eq!(above.resolve(EntityKind::Person, &text("Someone")).canonical_key, "paul_troutman");
    }

    #[test]
    fn test_tie_prefers_richer_entity_then_smallest_key() {
        #[derive(Debug)]
        struct Flat;
        impl SimilarityScorer for Flat {
            fn score(&self, _: &str, _: &str) -> f64 {
                0.9
            }
            fn name(&self) -> &'static str {
                "flat"
            }
        }

        let mut r = IdentityResolver::new(AliasTable::new(), Arc::new(Flat), ResolverPolicy::default());
        r.seed_entity(EntityKind::Person, "zed_b", ["Zed B"], 10);
        r.seed_entity(EntityKind::Person, "abe_a", ["Abe A"], 3);
        assert_eq!(r.resolve(EntityKind::Person, &text("Xyz")).canonical_key, "zed_b");

        let mut even = IdentityResolver::new(AliasTable::new(), Arc::new(Flat), ResolverPolicy::default());
        even.seed_entity(EntityKind::Person, "zed_b", ["Zed B"], 5);
        even.seed_entity(EntityKind::Person, "abe_a", ["Abe A"], 5);
        assert_eq!(even.resolve(EntityKind::Person, &text("Xyz")).canonical_key, "abe_a");
    }

    #[test]
    fn test_seeded_names_resolve_exactly() {
        let mut r = IdentityResolver::with_aliases(AliasTable::new());
        r.seed_entity(EntityKind::Location, "money_pit", ["The Money Pit"], 4);
        let res = r.resolve(EntityKind::Location, &text("the money pit"));
        assert_eq!(res.canonical_key, "money_pit");
        assert_eq!(res.method, ResolutionMethod::Known);
        assert_eq!(r.mention_count(EntityKind::Location, "money_pit"), 5);
    }

    #[test]
    fn test_theory_category_fallback() {
        let r = IdentityResolver::with_aliases(AliasTable::documentary_defaults());
        assert_eq!(r.theory_category("templar"), "religious");
        assert_eq!(r.theory_category("atlantis"), "other");
    }
}
