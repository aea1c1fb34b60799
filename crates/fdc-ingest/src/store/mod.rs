//! Persistent store collaborators
//!
//! The engine never talks to a concrete backend; it is handed a
//! [`RecordStore`] at construction time. Two implementations ship with the
//! crate: [`MemoryStore`] for tests and dry runs, and [`JsonlStore`] which
//! writes one JSON-lines file per record type.

mod jsonl;
mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use fdc_common::{NormalizedRecord, RecordId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store rejected batch for '{type_name}': {reason}")]
    Rejected { type_name: String, reason: String },

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Destination for normalized records.
///
/// No retries happen at this boundary; a failed call is final for the
/// records it covered. Retry policy, if wanted, belongs to the
/// implementation.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Persist a batch of records of one type. Returns the persisted
    /// identifiers in input order.
    async fn bulk_insert(
        &self,
        type_name: &str,
        records: Vec<NormalizedRecord>,
    ) -> Result<Vec<RecordId>, StoreError>;

    /// Persist a single record immediately. Returns the store-assigned
    /// identifier.
    async fn insert_one(
        &self,
        type_name: &str,
        record: NormalizedRecord,
    ) -> Result<RecordId, StoreError>;
}
