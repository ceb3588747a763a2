//! Run configuration.
//!
//! Defaults, overridden by `FACTFOLD_*` environment variables, overridden
//! in turn by command-line flags. Everything the resolver needs (threshold,
//! key length, alias table) is built from here and handed over explicitly.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::identity::{
    AliasTable, IdentityResolver, ResolverPolicy, SimilarityAlgorithm, DEFAULT_MATCH_THRESHOLD,
    DEFAULT_MAX_KEY_LEN,
};
use crate::kind::EntityKind;
use crate::reader::FactReader;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "FACTFOLD_";

/// Default store directory, relative to the working directory.
pub const DEFAULT_STORE_DIR: &str = "factfold-store";

/// Default log size that triggers compaction after a pass.
pub const DEFAULT_MAX_WAL_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub store_dir: PathBuf,
    /// Similarity a candidate must exceed to be reused, in (0, 1].
    pub match_threshold: f64,
    pub max_key_len: usize,
    pub similarity: SimilarityAlgorithm,
    /// Kinds whose free-text keys may be matched by similarity.
    pub fuzzy_kinds: BTreeSet<EntityKind>,
    /// JSON alias table layered over the built-in one.
    pub alias_file: Option<PathBuf>,
    /// Skip the built-in people and theory aliases.
    pub no_default_aliases: bool,
    pub sync_on_write: bool,
    pub max_wal_size: u64,
    /// Sources decoded concurrently; 1 reads sequentially.
    pub read_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(DEFAULT_STORE_DIR),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            similarity: SimilarityAlgorithm::default(),
            fuzzy_kinds: ResolverPolicy::default().fuzzy_kinds,
            alias_file: None,
            no_default_aliases: false,
            sync_on_write: true,
            max_wal_size: DEFAULT_MAX_WAL_SIZE,
            read_workers: std::thread::available_parallelism().map_or(1, |n| n.get().min(8)),
        }
    }
}

fn invalid(var: &str, value: &str, why: impl std::fmt::Display) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: format!("{ENV_PREFIX}{var}={value:?}: {why}"),
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ValidationError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected a boolean")),
    }
}

fn parse_kinds(var: &str, value: &str) -> Result<BTreeSet<EntityKind>, ValidationError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<EntityKind>().map_err(|e| invalid(var, value, e)))
        .collect()
}

impl Config {
    /// Defaults with `FACTFOLD_*` environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` for an unparsable variable,
    /// or any error [`Config::validate`] reports.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());
        let mut cfg = Self::default();

        if let Some(v) = var("STORE_DIR") {
            cfg.store_dir = PathBuf::from(v);
        }
        if let Some(v) = var("MATCH_THRESHOLD") {
            cfg.match_threshold = v
                .trim()
                .parse()
                .map_err(|e| invalid("MATCH_THRESHOLD", &v, e))?;
        }
        if let Some(v) = var("MAX_KEY_LEN") {
            cfg.max_key_len = v.trim().parse().map_err(|e| invalid("MAX_KEY_LEN", &v, e))?;
        }
        if let Some(v) = var("SIMILARITY") {
            cfg.similarity = v.parse().map_err(|e: String| invalid("SIMILARITY", &v, e))?;
        }
        if let Some(v) = var("FUZZY_KINDS") {
            cfg.fuzzy_kinds = parse_kinds("FUZZY_KINDS", &v)?;
        }
        if let Some(v) = var("ALIAS_FILE") {
            cfg.alias_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("SYNC_ON_WRITE") {
            cfg.sync_on_write = parse_bool("SYNC_ON_WRITE", &v)?;
        }
        if let Some(v) = var("READ_WORKERS") {
            cfg.read_workers = v.trim().parse().map_err(|e| invalid("READ_WORKERS", &v, e))?;
        }
        cfg.validate()
    }

    /// Checks ranges.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ThresholdOutOfRange` for a threshold outside
    /// (0, 1], or `ValidationError::InvalidConfig` for other bad values.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if !(self.match_threshold > 0.0 && self.match_threshold <= 1.0) {
            return Err(ValidationError::ThresholdOutOfRange {
                value: self.match_threshold,
            });
        }
        if self.max_key_len == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "max_key_len must be at least 1".to_string(),
            });
        }
        if self.read_workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "read_workers must be at least 1".to_string(),
            });
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "store_dir cannot be empty".to_string(),
            });
        }
        Ok(self)
    }

    #[must_use]
    pub fn resolver_policy(&self) -> ResolverPolicy {
        ResolverPolicy {
            threshold: self.match_threshold,
            max_key_len: self.max_key_len,
            fuzzy_kinds: self.fuzzy_kinds.clone(),
        }
    }

    /// Built-in aliases (unless disabled) with the alias file layered on top.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if the alias file cannot be
    /// read or parsed.
    pub fn alias_table(&self) -> Result<AliasTable, ValidationError> {
        let mut table = if self.no_default_aliases {
            AliasTable::new()
        } else {
            AliasTable::documentary_defaults()
        };
        if let Some(path) = &self.alias_file {
            table.extend(AliasTable::from_json_file(path)?);
        }
        Ok(table)
    }

    /// A resolver configured from this config.
    ///
    /// # Errors
    ///
    /// See [`Config::alias_table`].
    pub fn resolver(&self) -> Result<IdentityResolver, ValidationError> {
        Ok(IdentityResolver::new(
            self.alias_table()?,
            self.similarity.scorer(),
            self.resolver_policy(),
        ))
    }

    #[must_use]
    pub fn reader(&self) -> FactReader {
        FactReader::new().with_workers(self.read_workers)
    }

    #[cfg(feature = "persistent")]
    #[must_use]
    pub fn persistent_config(&self) -> crate::storage::persistent::PersistentConfig {
        crate::storage::persistent::PersistentConfig {
            max_wal_size: self.max_wal_size,
            sync_on_write: self.sync_on_write,
        }
    }
}
