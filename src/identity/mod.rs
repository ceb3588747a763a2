//! Identity resolution: from observed identifiers to canonical keys.
//!
//! - `alias`: injectable exact-match tables
//! - `similarity`: pluggable scoring for near matches
//! - `slug`: deterministic key derivation
//! - `resolver`: the precedence chain tying them together

pub mod alias;
pub mod resolver;
pub mod similarity;
pub mod slug;

pub use alias::{AliasEntry, AliasTable, UNKNOWN_THEORY_CATEGORY};
pub use resolver::{IdentityResolver, Resolution, ResolutionMethod, ResolverPolicy, DEFAULT_MATCH_THRESHOLD};
pub use similarity::{JaroWinkler, NormalizedLevenshtein, SimilarityAlgorithm, SimilarityScorer};
pub use slug::{episode_key, interval_key, normalize, slugify, title_case, DEFAULT_MAX_KEY_LEN};
