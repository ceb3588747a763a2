//! factfold re-ingestion CLI.
//!
//! Prints one JSON document on stdout per command; logs go to stderr.
//!
//! Exit status of `ingest`: 0 on success, 2 when a required source is
//! missing, 1 on any other fatal error. The run summary is printed in every
//! case.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use factfold::aggregate::recompute_all;
use factfold::export::export_all;
use factfold::storage::persistent::{open_store, PersistentStores};
use factfold::verify::verify;
use factfold::{CanonicalStore, Config, EntityKind, FactReader, IngestEngine, MentionLedger, SourceSpec};

#[derive(Debug, Parser)]
#[command(name = "factfold", version, about = "Fold noisy fact sources into a canonical dataset")]
struct Cli {
    /// Store directory
    #[arg(long, global = true, env = "FACTFOLD_STORE_DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one ingestion pass
    Ingest(IngestArgs),
    /// Entity and mention counts, or one kind's statistics
    Stats {
        #[arg(long)]
        kind: Option<EntityKind>,
    },
    /// Write `<kind>.json` and `<kind>.csv` tables
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Check store consistency and report dedup ratios
    Verify,
    /// Snapshot the store and truncate its log
    Compact,
}

#[derive(Debug, Args)]
struct IngestArgs {
    /// Optional source file or directory (repeatable)
    #[arg(long = "source", value_name = "PATH")]
    sources: Vec<PathBuf>,

    /// Source that must exist (repeatable)
    #[arg(long = "required-source", value_name = "PATH")]
    required_sources: Vec<PathBuf>,

    /// Discard existing canonical and ledger state first
    #[arg(long)]
    reset: bool,

    /// Export tables to this directory after a successful pass
    #[arg(long, value_name = "DIR")]
    export: Option<PathBuf>,

    /// JSON alias table layered over the built-in one
    #[arg(long, value_name = "FILE")]
    alias_file: Option<PathBuf>,

    /// Similarity threshold in (0, 1]
    #[arg(long)]
    threshold: Option<f64>,

    /// Sources decoded concurrently
    #[arg(long)]
    workers: Option<usize>,

    /// Skip fsync after each log append
    #[arg(long)]
    no_sync: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("factfold=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env().context("invalid FACTFOLD_* environment")?;
    if let Some(store) = cli.store {
        config.store_dir = store;
    }

    match cli.command {
        Command::Ingest(args) => ingest(config, args),
        Command::Stats { kind } => {
            let stores = open(&config)?;
            stats(&stores, kind)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { out } => {
            let stores = open(&config)?;
            let report = export_all(stores.canonical.as_ref(), stores.ledger.as_ref(), &out)?;
            print_json(&report)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Verify => {
            let stores = open(&config)?;
            let report = verify(stores.canonical.as_ref(), stores.ledger.as_ref())?;
            print_json(&report)?;
            Ok(if report.is_consistent() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Command::Compact => {
            let stores = open(&config)?;
            let result = stores.compact()?;
            print_json(&result)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open(config: &Config) -> Result<PersistentStores> {
    open_store(&config.store_dir, Some(config.persistent_config()))
        .with_context(|| format!("cannot open store {}", config.store_dir.display()))
}

fn ingest(mut config: Config, args: IngestArgs) -> Result<ExitCode> {
    if args.sources.is_empty() && args.required_sources.is_empty() {
        bail!("no sources given; pass --source or --required-source");
    }
    if let Some(file) = args.alias_file {
        config.alias_file = Some(file);
    }
    if let Some(threshold) = args.threshold {
        config.match_threshold = threshold;
    }
    if let Some(workers) = args.workers {
        config.read_workers = workers;
    }
    if args.no_sync {
        config.sync_on_write = false;
    }
    let config = config.validate()?;

    let specs: Vec<SourceSpec> = args
        .required_sources
        .iter()
        .map(SourceSpec::required)
        .chain(args.sources.iter().map(SourceSpec::optional))
        .collect();

    let stores = open(&config)?;
    // A pass that is going to abort must not wipe the store first.
    if args.reset && FactReader::check_required(&specs).is_ok() {
        stores.reset()?;
        warn!(store = %config.store_dir.display(), "reset store before ingestion");
    }

    let canonical: Arc<dyn CanonicalStore> = stores.canonical.clone();
    let ledger: Arc<dyn MentionLedger> = stores.ledger.clone();
    let mut engine = IngestEngine::new(canonical, ledger, config.resolver()?)?.with_reader(config.reader());
    let outcome = engine.ingest(&specs);
    print_json(&outcome.summary)?;

    let Some(err) = outcome.error else {
        if let Some(result) = stores.compact_if_needed()? {
            info!(entries = result.entries_compacted, "compacted store");
        }
        if let Some(out) = args.export {
            export(&stores, &out)?;
        }
        return Ok(ExitCode::SUCCESS);
    };

    error!("{err}");
    Ok(if err.is_missing_required_source() {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    })
}

fn export(stores: &PersistentStores, out: &Path) -> Result<()> {
    let report = export_all(stores.canonical.as_ref(), stores.ledger.as_ref(), out)?;
    info!(files = report.files.len(), out = %out.display(), "export complete");
    Ok(())
}

fn stats(stores: &PersistentStores, kind: Option<EntityKind>) -> Result<()> {
    let aggregates = recompute_all(stores.ledger.as_ref())?;
    if let Some(kind) = kind {
        let table = aggregates.get(&kind).cloned().unwrap_or_default();
        return print_json(&table);
    }

    let mut kinds = serde_json::Map::new();
    for kind in EntityKind::ALL {
        let entities = stores.canonical.count(kind)?;
        let mentions = stores.ledger.mentions(kind)?.len();
        if entities > 0 || mentions > 0 {
            kinds.insert(kind.to_string(), json!({ "entities": entities, "mentions": mentions }));
        }
    }
    print_json(&json!({
        "store": stores.dir,
        "kinds": kinds,
        "wal_bytes": stores.wal_size(),
        "segments": stores.segment_count(),
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
