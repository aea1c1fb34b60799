//! FDC Ingest - USDA FoodData Central ingestion tool

use anyhow::{Context, Result};
use clap::Parser;
use fdc_common::logging::{init_logging, LogConfig, LogLevel};
use fdc_ingest::archive::ensure_dataset;
use fdc_ingest::pipeline::{IngestOptions, IngestionPipeline};
use fdc_ingest::schema::StaticRegistry;
use fdc_ingest::source::{stream_root_array, RecordStream};
use fdc_ingest::store::{JsonlStore, MemoryStore, RecordStore};
use fdc_ingest::{datasets, IngestError};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Schema shipped with the binary; `--schema` overrides it.
const DEFAULT_SCHEMA: &str = include_str!("../schemas/fdc.json");

/// How many parsed records may sit between the parser and the pipeline
const SOURCE_BUFFER: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "fdc-ingest")]
#[command(author, version, about = "USDA FoodData Central ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Download and extract release archives without ingesting them
    Fetch {
        /// Directory for downloaded archives and extracted documents
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Releases to fetch; all known releases when omitted
        #[arg(short = 's', long = "dataset")]
        datasets: Vec<String>,
    },

    /// Ingest one or more releases into a JSONL store
    Ingest {
        /// Directory for downloaded archives and extracted documents
        #[arg(short, long, default_value = "./data")]
        data_dir: PathBuf,

        /// Releases to ingest; all known releases when omitted
        #[arg(short = 's', long = "dataset")]
        datasets: Vec<String>,

        /// Schema file; the built-in FoodData Central schema when omitted
        #[arg(long)]
        schema: Option<PathBuf>,

        /// Output directory for the JSONL collections
        #[arg(short, long, default_value = "./out")]
        output: PathBuf,

        /// Disable sub-record deduplication
        #[arg(long)]
        no_link: bool,

        /// Persist each record individually instead of in bulk flushes
        #[arg(long)]
        no_batch: bool,

        /// Root records admitted per flush window
        #[arg(long, default_value_t = 250)]
        batch_capacity: usize,

        /// Run the full pipeline against an in-memory store, writing nothing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    // Environment variables take precedence over flags
    let log_config = LogConfig::new()
        .with_level(log_level)
        .with_file_prefix("fdc-ingest")
        .with_env()?;
    init_logging(&log_config)?;

    match cli.command {
        Command::Fetch { data_dir, datasets } => {
            for dataset in resolve_datasets(&datasets)? {
                let path = ensure_dataset(&data_dir, &dataset).await?;
                info!(dataset = %dataset.name, path = %path.display(), "dataset ready");
            }
        },
        Command::Ingest {
            data_dir,
            datasets,
            schema,
            output,
            no_link,
            no_batch,
            batch_capacity,
            dry_run,
        } => {
            let registry = match schema {
                Some(path) => StaticRegistry::from_path(&path)
                    .with_context(|| format!("loading schema {}", path.display()))?,
                None => StaticRegistry::from_json_str(DEFAULT_SCHEMA)
                    .context("loading built-in schema")?,
            };
            let options = IngestOptions {
                link_enabled: !no_link,
                batch_enabled: !no_batch,
                batch_capacity,
            };

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, finishing in-flight work");
                    signal_token.cancel();
                }
            });

            for dataset in resolve_datasets(&datasets)? {
                let path = ensure_dataset(&data_dir, &dataset).await?;
                let source = stream_root_array(&path, &dataset.root_key, SOURCE_BUFFER);

                let interrupted = if dry_run {
                    ingest_one(
                        registry.clone(),
                        MemoryStore::new(),
                        options.clone(),
                        shutdown.clone(),
                        &dataset,
                        source,
                    )
                    .await?
                } else {
                    let store = JsonlStore::new(&output).with_context(|| {
                        format!("creating output directory {}", output.display())
                    })?;
                    ingest_one(
                        registry.clone(),
                        store,
                        options.clone(),
                        shutdown.clone(),
                        &dataset,
                        source,
                    )
                    .await?
                };
                if interrupted {
                    break;
                }
            }
        },
    }

    info!("Done");
    Ok(())
}

/// Run one dataset through the pipeline against `store`. Returns true when
/// the run was cut short by a shutdown signal.
async fn ingest_one<S: RecordStore>(
    registry: StaticRegistry,
    store: S,
    options: IngestOptions,
    shutdown: CancellationToken,
    dataset: &datasets::DatasetSpec,
    source: RecordStream,
) -> Result<bool> {
    let pipeline = IngestionPipeline::new(registry, store, options).with_shutdown(shutdown);

    match pipeline.run(&dataset.name, &dataset.root_type, source).await {
        Ok(report) if report.cancelled => {
            warn!(dataset = %dataset.name, records = report.records, "ingest interrupted");
            Ok(true)
        },
        Ok(report) => {
            info!(
                dataset = %dataset.name,
                records = report.records,
                cache_hits = report.cache_hits,
                elapsed = %report.human_elapsed(),
                "dataset ingested"
            );
            Ok(false)
        },
        Err(IngestError::BulkWrites { failures }) => {
            for failure in &failures {
                warn!(
                    type_name = %failure.type_name,
                    records = failure.records,
                    error = %failure.source,
                    "bulk write failed"
                );
            }
            anyhow::bail!("{} bulk write(s) failed for {}", failures.len(), dataset.name)
        },
        Err(e) => Err(e.into()),
    }
}

/// Map requested names to catalog entries; no names means every release.
fn resolve_datasets(names: &[String]) -> Result<Vec<datasets::DatasetSpec>> {
    if names.is_empty() {
        return Ok(datasets::catalog());
    }
    names
        .iter()
        .map(|name| {
            datasets::find(name).with_context(|| {
                format!(
                    "unknown dataset '{name}'; known datasets: {}",
                    datasets::catalog()
                        .iter()
                        .map(|d| d.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
        })
        .collect()
}
