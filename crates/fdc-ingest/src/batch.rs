//! Capacity-bounded write batching
//!
//! The [`WriteBatcher`] buffers normalized records per type and flushes them
//! in bulk. A flush clears the queues synchronously and dispatches one bulk
//! write per non-empty queue on a background task; the writes of a single
//! flush run concurrently and fail independently. At most one flush is in
//! flight per batcher: the next flush (and the final completion wait) awaits
//! the previous flush's task handle instead of polling a lock.

use crate::error::IngestError;
use crate::store::{RecordStore, StoreError};
use fdc_common::{NormalizedRecord, RecordId};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A bulk write that the store rejected. Fatal only to its own records.
#[derive(Error, Debug)]
#[error("bulk write of {records} '{type_name}' record(s) failed: {source}")]
pub struct BulkWriteFailure {
    pub type_name: String,
    pub records: usize,
    #[source]
    pub source: StoreError,
}

pub struct WriteBatcher<S> {
    store: Arc<S>,
    batching: bool,
    capacity: usize,
    root_count: usize,
    queues: HashMap<String, Vec<NormalizedRecord>>,
    in_flight: Option<JoinHandle<Vec<BulkWriteFailure>>>,
    failures: Vec<BulkWriteFailure>,
    flushes: u64,
}

impl<S: RecordStore> WriteBatcher<S> {
    /// `capacity` is the number of root records admitted per flush window;
    /// it is ignored when `batching` is false.
    pub fn new(store: Arc<S>, batching: bool, capacity: usize) -> Self {
        Self {
            store,
            batching,
            capacity: capacity.max(1),
            root_count: 0,
            queues: HashMap::new(),
            in_flight: None,
            failures: Vec::new(),
            flushes: 0,
        }
    }

    /// Claim a slot in the current flush window for one root record.
    ///
    /// Returns false once the window is full; the caller must flush before
    /// enqueuing further root records.
    pub fn admit(&mut self) -> bool {
        if self.root_count < self.capacity {
            self.root_count += 1;
            true
        } else {
            false
        }
    }

    /// Buffer a record for the next flush (batched mode, never blocks), or
    /// write it immediately and return the store-assigned id (unbatched).
    pub async fn enqueue(
        &mut self,
        type_name: &str,
        record: NormalizedRecord,
    ) -> Result<RecordId, StoreError> {
        if self.batching {
            let id = record.id;
            self.queues
                .entry(type_name.to_string())
                .or_default()
                .push(record);
            Ok(id)
        } else {
            self.store.insert_one(type_name, record).await
        }
    }

    /// Number of flushes dispatched so far
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Number of records currently buffered
    pub fn buffered(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    async fn await_in_flight(&mut self) -> Result<(), IngestError> {
        if let Some(handle) = self.in_flight.take() {
            let failures = handle
                .await
                .map_err(|e| IngestError::Internal(format!("flush task failed: {e}")))?;
            self.failures.extend(failures);
        }
        Ok(())
    }

    /// Flush the buffered queues.
    ///
    /// Waits for the previous flush (if any) to complete, resets the flush
    /// window, takes the queues so concurrent enqueues start a fresh
    /// generation, then dispatches one bulk write per non-empty queue.
    /// Returns once the writes are dispatched, not once they complete.
    pub async fn flush(&mut self) -> Result<(), IngestError> {
        self.await_in_flight().await?;
        self.root_count = 0;

        let queues = std::mem::take(&mut self.queues);
        if queues.is_empty() {
            return Ok(());
        }
        self.flushes += 1;
        debug!(
            flush = self.flushes,
            types = queues.len(),
            records = queues.values().map(Vec::len).sum::<usize>(),
            "dispatching bulk writes"
        );

        let store = Arc::clone(&self.store);
        self.in_flight = Some(tokio::spawn(async move {
            let writes = queues.into_iter().map(|(type_name, records)| {
                let store = Arc::clone(&store);
                async move {
                    let count = records.len();
                    match store.bulk_insert(&type_name, records).await {
                        Ok(_) => None,
                        Err(source) => {
                            warn!(%type_name, records = count, error = %source, "bulk write failed");
                            Some(BulkWriteFailure {
                                type_name,
                                records: count,
                                source,
                            })
                        },
                    }
                }
            });
            join_all(writes).await.into_iter().flatten().collect()
        }));
        Ok(())
    }

    /// Resolve once every dispatched bulk write has completed, returning the
    /// failures aggregated across all flushes of this batcher's lifetime.
    pub async fn wait_for_completion(&mut self) -> Result<Vec<BulkWriteFailure>, IngestError> {
        self.await_in_flight().await?;
        Ok(std::mem::take(&mut self.failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;

    fn record() -> NormalizedRecord {
        NormalizedRecord::new(BTreeMap::new())
    }

    fn batcher(store: &MemoryStore, capacity: usize) -> WriteBatcher<MemoryStore> {
        WriteBatcher::new(Arc::new(store.clone()), true, capacity)
    }

    #[tokio::test]
    async fn test_admit_enforces_capacity() {
        let store = MemoryStore::new();
        let mut batcher = batcher(&store, 3);

        assert!(batcher.admit());
        assert!(batcher.admit());
        assert!(batcher.admit());
        assert!(!batcher.admit());
        // Repeated refusals do not consume anything.
        assert!(!batcher.admit());

        batcher.flush().await.unwrap();
        assert!(batcher.admit());
    }

    #[tokio::test]
    async fn test_enqueue_buffers_until_flush() {
        let store = MemoryStore::new();
        let mut batcher = batcher(&store, 10);

        let rec = record();
        let id = batcher.enqueue("Nutrient", rec).await.unwrap();
        assert_eq!(batcher.buffered(), 1);
        assert_eq!(store.count("Nutrient"), 0);

        batcher.flush().await.unwrap();
        assert_eq!(batcher.buffered(), 0);
        let failures = batcher.wait_for_completion().await.unwrap();
        assert!(failures.is_empty());
        assert_eq!(store.records("Nutrient")[0].id, id);
    }

    #[tokio::test]
    async fn test_empty_flush_is_a_noop() {
        let store = MemoryStore::new();
        let mut batcher = batcher(&store, 10);
        batcher.flush().await.unwrap();
        assert_eq!(batcher.flushes(), 0);
    }

    #[tokio::test]
    async fn test_unbatched_enqueue_writes_immediately() {
        let store = MemoryStore::new();
        let mut batcher = WriteBatcher::new(Arc::new(store.clone()), false, 10);

        let id = batcher.enqueue("Nutrient", record()).await.unwrap();
        assert_eq!(store.count("Nutrient"), 1);
        assert_eq!(store.records("Nutrient")[0].id, id);
        assert_eq!(batcher.buffered(), 0);
    }

    #[tokio::test]
    async fn test_failed_type_does_not_block_others() {
        let store = MemoryStore::new().failing_on("Nutrient");
        let mut batcher = batcher(&store, 10);

        batcher.enqueue("Nutrient", record()).await.unwrap();
        batcher.enqueue("FoodNutrient", record()).await.unwrap();
        batcher.flush().await.unwrap();

        let failures = batcher.wait_for_completion().await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].type_name, "Nutrient");
        assert_eq!(failures[0].records, 1);

        // The sibling write landed.
        assert_eq!(store.count("FoodNutrient"), 1);
    }

    #[tokio::test]
    async fn test_failures_aggregate_across_flushes() {
        let store = MemoryStore::new().failing_on("Nutrient");
        let mut batcher = batcher(&store, 10);

        batcher.enqueue("Nutrient", record()).await.unwrap();
        batcher.flush().await.unwrap();
        batcher.enqueue("Nutrient", record()).await.unwrap();
        batcher.flush().await.unwrap();

        let failures = batcher.wait_for_completion().await.unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(store.bulk_calls("Nutrient"), 2);
    }
}
