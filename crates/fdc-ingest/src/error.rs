//! Error types for the ingestion engine

use crate::batch::BulkWriteFailure;
use crate::schema::SchemaError;
use crate::source::SourceError;
use crate::store::StoreError;
use thiserror::Error;

/// Top-level error for an ingestion run.
///
/// Everything here is fatal to the run except `BulkWrites`, which is fatal
/// only to the records of the failed batches and is surfaced once the run
/// drains. Nothing is retried and nothing is swallowed.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Malformed record for type '{type_name}': {reason}")]
    MalformedRecord { type_name: String, reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{} bulk write(s) failed", .failures.len())]
    BulkWrites { failures: Vec<BulkWriteFailure> },

    #[error("Internal task failure: {0}")]
    Internal(String),
}
