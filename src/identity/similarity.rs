//! Pluggable similarity scoring.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Scores how alike two normalized names are, in [0.0, 1.0].
pub trait SimilarityScorer: Send + Sync + fmt::Debug {
    fn score(&self, a: &str, b: &str) -> f64;

    fn name(&self) -> &'static str;
}

/// Edit-distance ratio. Tolerates dropped or swapped letters from
/// transcription ("Rick Lagna" against "rick lagina").
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedLevenshtein;

impl SimilarityScorer for NormalizedLevenshtein {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::normalized_levenshtein(a, b)
    }

    fn name(&self) -> &'static str {
        "normalized_levenshtein"
    }
}

/// Prefix-weighted Jaro-Winkler.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinkler;

impl SimilarityScorer for JaroWinkler {
    fn score(&self, a: &str, b: &str) -> f64 {
        strsim::jaro_winkler(a, b)
    }

    fn name(&self) -> &'static str {
        "jaro_winkler"
    }
}

/// Configurable choice of scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityAlgorithm {
    #[default]
    NormalizedLevenshtein,
    JaroWinkler,
}

impl SimilarityAlgorithm {
    #[must_use]
    pub fn scorer(self) -> Arc<dyn SimilarityScorer> {
        match self {
            Self::NormalizedLevenshtein => Arc::new(NormalizedLevenshtein),
            Self::JaroWinkler => Arc::new(JaroWinkler),
        }
    }
}

impl std::str::FromStr for SimilarityAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "normalized_levenshtein" | "levenshtein" => Ok(Self::NormalizedLevenshtein),
            "jaro_winkler" | "jaro" => Ok(Self::JaroWinkler),
            other => Err(format!("unknown similarity algorithm: {other}")),
        }
    }
}
