//! Ingestion pass orchestration.
//!
//! One pass reads every declared source, then folds the facts into the
//! store strictly in read order: resolve, merge, upsert, append a mention.
//! Aggregates are rebuilt from the ledger once all facts are applied.
//!
//! Reading may fan out across threads; everything after it runs on the
//! caller's thread so tie-breaks never depend on scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::aggregate::{self, AggregateTable};
use crate::confidence::Confidence;
use crate::error::{FactfoldError, FactfoldResult, IngestError};
use crate::fact::Fact;
use crate::identity::IdentityResolver;
use crate::kind::EntityKind;
use crate::ledger::RunId;
use crate::merge::{fill_if_absent, merge, MergeOutcome};
use crate::reader::{FactReader, SourceBatch, SourceSpec, SourceSummary};
use crate::storage::{CanonicalStore, InMemoryCanonicalStore, InMemoryMentionLedger, MentionLedger, StorageError};
use crate::value::Value;

/// Attribute holding a theory's classification.
pub const THEORY_CATEGORY_ATTRIBUTE: &str = "theory_type";

/// Totals across all sources of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub facts: usize,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub missing_sources: usize,
}

impl RunTotals {
    fn add(&mut self, source: &SourceSummary) {
        self.facts += source.facts;
        self.processed += source.processed;
        self.inserted += source.inserted;
        self.updated += source.updated;
        self.unchanged += source.unchanged;
        self.skipped += source.skipped;
        self.malformed += source.malformed;
        self.missing_sources += usize::from(source.missing);
    }
}

/// What one ingestion pass did. Emitted whether or not the pass succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceSummary>,
    pub totals: RunTotals,
    /// Canonical entities per kind after the pass.
    pub entities: BTreeMap<EntityKind, usize>,
    /// Ledger rows across all kinds after the pass.
    pub mentions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Statistics rebuilt at the end of the pass.
    #[serde(skip)]
    pub aggregates: AggregateTable,
}

impl RunSummary {
    fn new(run_id: RunId) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            sources: Vec::new(),
            totals: RunTotals::default(),
            entities: BTreeMap::new(),
            mentions: 0,
            error: None,
            aggregates: AggregateTable::new(),
        }
    }
}

/// A pass's summary, plus the error that stopped it, if any.
#[derive(Debug)]
pub struct IngestOutcome {
    pub summary: RunSummary,
    pub error: Option<FactfoldError>,
}

impl IngestOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The summary, or the error that stopped the pass.
    ///
    /// # Errors
    ///
    /// Returns the fatal error recorded for the pass.
    pub fn into_result(self) -> FactfoldResult<RunSummary> {
        match self.error {
            None => Ok(self.summary),
            Some(e) => Err(e),
        }
    }
}

/// Result of applying one fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub canonical_key: String,
    pub outcome: MergeOutcome,
    /// Ledger sequence of the recorded mention.
    pub sequence: u64,
}

/// Folds fact streams into a canonical store and mention ledger.
pub struct IngestEngine {
    canonical: Arc<dyn CanonicalStore>,
    ledger: Arc<dyn MentionLedger>,
    resolver: IdentityResolver,
    reader: FactReader,
}

impl std::fmt::Debug for IngestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestEngine")
            .field("resolver", &self.resolver)
            .field("reader", &self.reader)
            .finish_non_exhaustive()
    }
}

impl IngestEngine {
    /// Engine over existing stores.
    ///
    /// Names already observed for stored entities are seeded into the
    /// resolver, together with their mention counts, so raw keys keep
    /// resolving to the same canonical keys across runs.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the stores cannot be scanned.
    pub fn new(
        canonical: Arc<dyn CanonicalStore>,
        ledger: Arc<dyn MentionLedger>,
        mut resolver: IdentityResolver,
    ) -> FactfoldResult<Self> {
        let mut seeded = 0usize;
        for kind in EntityKind::ALL {
            let counts = aggregate::recompute(ledger.as_ref(), kind)?;
            for entity in canonical.list(kind)? {
                let mentions = counts
                    .get(&entity.canonical_key)
                    .map_or(0, |s| s.mention_count);
                let display = entity.display_attributes.get("name").and_then(Value::as_str);
                let names = entity.observed_names.iter().map(String::as_str).chain(display);
                resolver.seed_entity(kind, &entity.canonical_key, names, mentions);
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!(entities = seeded, "seeded resolver from store");
        }

        Ok(Self {
            canonical,
            ledger,
            resolver,
            reader: FactReader::new(),
        })
    }

    /// Engine over fresh in-memory stores.
    #[must_use]
    pub fn in_memory(resolver: IdentityResolver) -> Self {
        Self {
            canonical: Arc::new(InMemoryCanonicalStore::new()),
            ledger: Arc::new(InMemoryMentionLedger::new()),
            resolver,
            reader: FactReader::new(),
        }
    }

    #[must_use]
    pub fn with_reader(mut self, reader: FactReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn canonical_store(&self) -> &Arc<dyn CanonicalStore> {
        &self.canonical
    }

    pub fn mention_ledger(&self) -> &Arc<dyn MentionLedger> {
        &self.ledger
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Runs one ingestion pass over `specs`.
    ///
    /// A missing required source stops the pass before anything is written.
    /// A store failure stops it where it happened; writes made before it
    /// stay. Either way the summary is returned alongside the error.
    pub fn ingest(&mut self, specs: &[SourceSpec]) -> IngestOutcome {
        let run_id = RunId::new();
        match self.reader.read(specs) {
            Ok(batches) => self.ingest_batches(run_id, batches),
            Err(e) => {
                error!(run_id = %run_id, error = %e, "ingestion pass aborted");
                let mut summary = RunSummary::new(run_id);
                for spec in specs {
                    let mut source = SourceSummary::new(spec);
                    source.missing = !spec.path.exists();
                    summary.totals.add(&source);
                    summary.sources.push(source);
                }
                self.finish(summary, Some(e.into()))
            }
        }
    }

    /// Runs one ingestion pass over facts already in memory.
    pub fn ingest_facts(&mut self, label: &str, facts: Vec<Fact>) -> IngestOutcome {
        let summary = SourceSummary {
            source: label.to_string(),
            facts: facts.len(),
            records: facts.len(),
            ..SourceSummary::default()
        };
        self.ingest_batches(RunId::new(), vec![SourceBatch { summary, facts }])
    }

    fn ingest_batches(&mut self, run_id: RunId, batches: Vec<SourceBatch>) -> IngestOutcome {
        let mut summary = RunSummary::new(run_id);
        let mut failure: Option<FactfoldError> = None;

        for batch in batches {
            let SourceBatch { summary: mut source, facts } = batch;
            if failure.is_some() {
                source.skipped = facts.len();
            } else {
                for (idx, fact) in facts.iter().enumerate() {
                    match self.apply(fact, run_id) {
                        Ok(applied) => {
                            source.processed += 1;
                            match applied.outcome {
                                MergeOutcome::Inserted => source.inserted += 1,
                                MergeOutcome::Updated => source.updated += 1,
                                MergeOutcome::Unchanged => source.unchanged += 1,
                            }
                        }
                        Err(e) => {
                            let message = e.to_string();
                            source.skipped = facts.len() - idx;
                            source.record_error(IngestError::StoreWriteFailure { message: message.clone() });
                            failure = Some(IngestError::StoreWriteFailure { message }.into());
                            break;
                        }
                    }
                }
            }
            summary.totals.add(&source);
            summary.sources.push(source);
        }

        if let Some(e) = &failure {
            error!(run_id = %run_id, error = %e, "ingestion pass stopped");
        }
        self.finish(summary, failure)
    }

    /// Resolves, merges and records one fact.
    ///
    /// # Errors
    ///
    /// Returns the storage error of a rejected read or write.
    pub fn apply(&mut self, fact: &Fact, run_id: RunId) -> Result<Applied, StorageError> {
        let canonical_key = self.resolver.resolve(fact.kind, &fact.raw_key).canonical_key;
        let existing = self.canonical.get(fact.kind, &canonical_key)?;
        let (mut entity, mut outcome) = merge(existing, &canonical_key, fact);

        if fact.kind == EntityKind::Theory {
            let category = self.resolver.theory_category(&canonical_key).to_string();
            let filled = fill_if_absent(
                &mut entity,
                THEORY_CATEGORY_ATTRIBUTE,
                Value::from(category),
                Confidence::zero(),
            );
            if filled && outcome == MergeOutcome::Unchanged {
                outcome = MergeOutcome::Updated;
            }
        }

        if outcome.is_write() {
            self.canonical.upsert(fact.kind, entity)?;
        }
        let sequence = self.ledger.record_fact(&canonical_key, fact, run_id)?;
        Ok(Applied {
            canonical_key,
            outcome,
            sequence,
        })
    }

    fn finish(&self, mut summary: RunSummary, mut failure: Option<FactfoldError>) -> IngestOutcome {
        match self.snapshot_counts(&mut summary) {
            Ok(()) => {}
            Err(e) if failure.is_none() => failure = Some(e.into()),
            Err(e) => error!(error = %e, "could not rebuild aggregates"),
        }
        summary.finished_at = Utc::now();
        summary.error = failure.as_ref().map(ToString::to_string);

        info!(
            run_id = %summary.run_id,
            sources = summary.sources.len(),
            facts = summary.totals.facts,
            inserted = summary.totals.inserted,
            updated = summary.totals.updated,
            unchanged = summary.totals.unchanged,
            skipped = summary.totals.skipped,
            malformed = summary.totals.malformed,
            mentions = summary.mentions,
            "ingestion pass finished"
        );
        IngestOutcome {
            summary,
            error: failure,
        }
    }

    fn snapshot_counts(&self, summary: &mut RunSummary) -> Result<(), StorageError> {
        summary.aggregates = aggregate::recompute_all(self.ledger.as_ref())?;
        for kind in EntityKind::ALL {
            let count = self.canonical.count(kind)?;
            if count > 0 {
                summary.entities.insert(kind, count);
            }
        }
        summary.mentions = self.ledger.len()?;
        Ok(())
    }
}
