//! # factfold - fact canonicalization for documentary-series data
//!
//! Extractors emit the same real-world thing many times over: a person's
//! name in ten thousand subtitle lines, a borehole in a CSV override and in
//! a curated JSON file, a theory under three spellings. factfold folds that
//! stream into one canonical entity per thing while keeping every mention.
//!
//! ## Core Concepts
//!
//! - **Fact**: one immutable observation, with confidence and provenance
//! - **Identity resolution**: raw identifier to canonical key (aliases, then
//!   names already seen, then similarity, then slug derivation)
//! - **Merge**: per-attribute confidence arbitration, first writer wins ties
//! - **Mention ledger**: append-only history; the source of truth for counts
//! - **Aggregates**: statistics recomputed from the ledger, never maintained
//!
//! ## Usage
//!
//! ```rust
//! use factfold::{AliasTable, EntityKind, Fact, IdentityResolver, IngestEngine, RawKey};
//! use factfold::Confidence;
//!
//! let mut engine = IngestEngine::in_memory(IdentityResolver::with_aliases(
//!     AliasTable::documentary_defaults(),
//! ));
//! let facts = vec![
//!     Fact::builder(EntityKind::Person, RawKey::text("Marty"))
//!         .confidence(Confidence::new(0.7)?)
//!         .build()?,
//!     Fact::builder(EntityKind::Person, RawKey::text("Marty Lagina"))
//!         .confidence(Confidence::new(0.95)?)
//!         .build()?,
//! ];
//! let summary = engine.ingest_facts("people", facts).into_result()?;
//! assert_eq!(summary.aggregates[&EntityKind::Person]["marty_lagina"].mention_count, 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod confidence;
pub mod entity;
pub mod error;
pub mod fact;
pub mod kind;
pub mod ledger;
pub mod source;
pub mod value;

// Canonicalization
pub mod aggregate;
pub mod identity;
pub mod merge;
pub mod storage;

// Pipeline
pub mod config;
pub mod engine;
pub mod export;
pub mod reader;
pub mod verify;

pub use aggregate::{AggregateStats, AggregateTable};
pub use confidence::Confidence;
pub use config::Config;
pub use engine::{Applied, IngestEngine, IngestOutcome, RunSummary, RunTotals};
pub use entity::CanonicalEntity;
pub use error::{ExportError, FactfoldError, FactfoldResult, IngestError, ValidationError};
pub use fact::{Fact, FactBuilder, MentionContext, RawKey};
pub use identity::{AliasTable, IdentityResolver, Resolution, ResolutionMethod, ResolverPolicy};
pub use kind::EntityKind;
pub use ledger::{MentionRecord, RunId};
pub use merge::{merge, MergeOutcome};
pub use reader::{FactReader, SourceSpec, SourceSummary};
pub use source::{OriginKind, Provenance};
pub use storage::{CanonicalStore, InMemoryCanonicalStore, InMemoryMentionLedger, MentionLedger, StorageError};
pub use value::Value;
pub use verify::VerifyReport;
