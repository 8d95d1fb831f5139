use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use minify_catalog::{Catalog, DEFAULT_DB_FILENAME, DEFAULT_SOURCE_LIST};
use minify_ingest::{
    BatchOptions, BatchOrchestrator, DownloadPolicy, ExternalIndexer, FailurePolicy, FileOutcome,
    FileProcessor, HttpAcquirer, Manifest, DEFAULT_BASE_URL, DEFAULT_INDEXER_PROGRAM,
};
use minify_store::{IngestionRecord, Store};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "minify-gaia",
    version,
    about = "Filter Gaia DR3 source files into a compact, spatially indexed SQLite table"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Only print warnings and errors (RUST_LOG overrides).
    #[arg(long, short = 'q', global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the main table, its indices and the metadata table.
    MakeDb {
        #[command(flatten)]
        store: StoreArgs,

        /// Drop an existing database file first.
        #[arg(long)]
        clobber: bool,
    },

    /// Ingest one source file, keyed by its file name.
    AddFile {
        file: PathBuf,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        indexer: IndexerArgs,
    },

    /// Ingest every file named in a source list, skipping files already loaded.
    IngestAll {
        #[arg(long, default_value = DEFAULT_SOURCE_LIST)]
        source_list: PathBuf,

        /// Where source files are looked up and downloaded to.
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,

        /// Download files missing from the data directory.
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        download_if_missing: bool,

        /// Base URL source files are downloaded from.
        #[arg(long, default_value = DEFAULT_BASE_URL)]
        loc: String,

        /// Per-download timeout in seconds.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Stop at the first file that fails instead of moving on.
        #[arg(long)]
        fail_fast: bool,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        indexer: IndexerArgs,
    },

    /// Print the metadata records of an existing database.
    Status {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    #[arg(long, default_value = DEFAULT_DB_FILENAME)]
    db: PathBuf,

    /// Catalog JSON; the astrometry preset when omitted.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

impl StoreArgs {
    fn catalog(&self) -> Result<Catalog> {
        match &self.catalog {
            Some(path) => Catalog::from_json_path(path)
                .with_context(|| format!("load catalog {}", path.display())),
            None => Ok(Catalog::astrometry()),
        }
    }

    fn open(&self, catalog: &Catalog) -> Result<Store> {
        Store::open(&self.db, catalog).with_context(|| format!("open {}", self.db.display()))
    }
}

#[derive(Args, Debug)]
struct IndexerArgs {
    /// Spatial indexing program, run as `<program> <depth> <input> <output>`.
    #[arg(long, default_value = DEFAULT_INDEXER_PROGRAM)]
    indexer: PathBuf,

    /// Directory for per-file intermediate artifacts.
    #[arg(long)]
    scratch_dir: Option<PathBuf>,
}

impl IndexerArgs {
    fn processor(&self, catalog: Catalog, store: Store) -> FileProcessor<ExternalIndexer> {
        let indexer = ExternalIndexer::new(&self.indexer, catalog.spatial().clone());
        let processor = FileProcessor::new(Arc::new(catalog), store, indexer);
        match &self.scratch_dir {
            Some(dir) => processor.with_scratch_root(dir),
            None => processor,
        }
    }
}

#[derive(Debug, Serialize)]
struct MakeDbOutput<'a> {
    db: &'a Path,
    table: &'a str,
    columns: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AddFileOutput {
    status: &'static str,
    #[serde(flatten)]
    record: IngestionRecord,
}

#[derive(Debug, Serialize)]
struct StatusOutput<'a> {
    db: &'a Path,
    table: &'a str,
    rows: u64,
    files: Vec<IngestionRecord>,
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::MakeDb { store, clobber } => {
            let catalog = store.catalog()?;
            let created = Store::create(&store.db, &catalog, clobber)
                .with_context(|| format!("create {}", store.db.display()))?;
            log::info!("created {} in {}", created.table_name(), store.db.display());
            print_json(&MakeDbOutput {
                db: &store.db,
                table: created.table_name(),
                columns: created.columns().iter().map(|c| c.name.clone()).collect(),
            })?;
        }
        Command::AddFile {
            file,
            store,
            indexer,
        } => {
            let catalog = store.catalog()?;
            let handle = store.open(&catalog)?;
            let processor = indexer.processor(catalog, handle);
            let outcome = processor
                .process_path(&file)
                .with_context(|| format!("ingest {}", file.display()))?;
            let output = match outcome {
                FileOutcome::Ingested(record) => AddFileOutput {
                    status: "ingested",
                    record,
                },
                FileOutcome::Skipped(record) => AddFileOutput {
                    status: "skipped",
                    record,
                },
            };
            print_json(&output)?;
        }
        Command::IngestAll {
            source_list,
            data_dir,
            download_if_missing,
            loc,
            timeout_secs,
            fail_fast,
            store,
            indexer,
        } => {
            let manifest = Manifest::from_path(&source_list)?;
            let catalog = store.catalog()?;
            let handle = store.open(&catalog)?;
            let processor = indexer.processor(catalog, handle);
            let acquirer = HttpAcquirer::new(DownloadPolicy {
                base_url: loc,
                timeout: Duration::from_secs(timeout_secs),
            })?;
            let options = BatchOptions {
                data_dir,
                acquire_if_missing: download_if_missing,
                on_error: if fail_fast {
                    FailurePolicy::FailFast
                } else {
                    FailurePolicy::Continue
                },
            };
            log::info!(
                "ingesting {} files from {}",
                manifest.len(),
                source_list.display()
            );
            let summary = BatchOrchestrator::new(&processor, options)
                .with_acquirer(&acquirer)
                .run(&manifest)?;
            print_json(&summary)?;
            if summary.aborted {
                return Ok(1);
            }
        }
        Command::Status { store } => {
            let catalog = store.catalog()?;
            let handle = store.open(&catalog)?;
            print_json(&StatusOutput {
                db: &store.db,
                table: handle.table_name(),
                rows: handle.row_count()?,
                files: handle.ingestion_records()?,
            })?;
        }
    }
    Ok(0)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    let code = run(cli)?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
