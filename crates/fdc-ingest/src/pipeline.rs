//! Ingestion pipeline: drives the source stream through normalization and
//! batched persistence
//!
//! The pipeline is a single cooperative task. It pulls one raw element at a
//! time from the source (the bounded source channel pauses the parser while
//! an element is being processed), claims a slot in the batcher's flush
//! window for every root record, and flushes when the window fills. Intake
//! resumes as soon as a flush is dispatched, not once its writes complete.
//! On source exhaustion or shutdown it drains: final flush, then a wait for
//! every dispatched bulk write.

use crate::batch::WriteBatcher;
use crate::dedup::DedupIndex;
use crate::error::IngestError;
use crate::normalize::Materializer;
use crate::schema::{SchemaCache, SchemaRegistry};
use crate::source::RecordStream;
use crate::store::RecordStore;
use chrono::Utc;
use fdc_common::IngestReport;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often progress is logged, in root records
const PROGRESS_INTERVAL: u64 = 1000;

/// Knobs consumed by the core; parsed and owned elsewhere.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Deduplicate structurally identical sub-records
    pub link_enabled: bool,
    /// Buffer records and persist them in bulk flushes
    pub batch_enabled: bool,
    /// Root records admitted per flush window
    pub batch_capacity: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            link_enabled: true,
            batch_enabled: true,
            batch_capacity: 250,
        }
    }
}

pub struct IngestionPipeline<R, S> {
    registry: R,
    store: Arc<S>,
    options: IngestOptions,
    shutdown: CancellationToken,
}

impl<R, S> IngestionPipeline<R, S>
where
    R: SchemaRegistry + Send,
    S: RecordStore,
{
    pub fn new(registry: R, store: S, options: IngestOptions) -> Self {
        Self {
            registry,
            store: Arc::new(store),
            options,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire an external shutdown signal. When cancelled, the pipeline stops
    /// intake, flushes what it has buffered, and waits for the writes to
    /// complete; nothing is silently abandoned.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Ingest one dataset: every element of `source`, normalized as
    /// `root_type`, in source order.
    #[tracing::instrument(skip(self, source))]
    pub async fn run(
        self,
        dataset: &str,
        root_type: &str,
        mut source: RecordStream,
    ) -> Result<IngestReport, IngestError> {
        let started_at = Utc::now();
        let start = Instant::now();

        let batcher = WriteBatcher::new(
            Arc::clone(&self.store),
            self.options.batch_enabled,
            self.options.batch_capacity,
        );
        let mut materializer = Materializer::new(
            SchemaCache::new(self.registry),
            DedupIndex::new(self.options.link_enabled),
            batcher,
            root_type,
        );

        info!(
            dataset,
            root_type,
            link = self.options.link_enabled,
            batch = self.options.batch_enabled,
            capacity = self.options.batch_capacity,
            "starting ingest"
        );

        let mut count: u64 = 0;
        let mut cancelled = false;
        loop {
            let raw = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    warn!(dataset, processed = count, "shutdown requested, draining");
                    cancelled = true;
                    break;
                }
                element = source.next() => match element {
                    Some(raw) => raw,
                    None => break,
                },
            };

            if self.options.batch_enabled && !materializer.batcher_mut().admit() {
                // Window full: intake stays paused until the flush is
                // dispatched, not until its writes complete.
                debug!(dataset, processed = count, "capacity reached, flushing");
                materializer.batcher_mut().flush().await?;
            }

            materializer.materialize(&raw, root_type).await?;
            count += 1;
            if count % PROGRESS_INTERVAL == 0 {
                debug!(
                    dataset,
                    processed = count,
                    cache_hits = materializer.cache_hits(),
                    "ingest progress"
                );
            }
        }

        // Draining: surface a parse failure before declaring the data
        // complete, then persist everything still buffered.
        if cancelled {
            drop(source);
        } else {
            source.finish().await?;
        }
        materializer.batcher_mut().flush().await?;
        let failures = materializer.batcher_mut().wait_for_completion().await?;
        if !failures.is_empty() {
            return Err(IngestError::BulkWrites { failures });
        }

        let report = IngestReport {
            dataset: dataset.to_string(),
            records: count,
            cache_hits: materializer.cache_hits(),
            flushes: materializer.batcher_mut().flushes(),
            cancelled,
            started_at,
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            dataset,
            records = report.records,
            cache_hits = report.cache_hits,
            flushes = report.flushes,
            cancelled = report.cancelled,
            elapsed = %report.human_elapsed(),
            "ingest finished"
        );
        Ok(report)
    }
}
