//! Common types used across the FDC workspace

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An untyped element pulled off the source stream. Ephemeral: consumed once
/// by normalization and then dropped.
pub type RawRecord = serde_json::Value;

/// Opaque identifier for a persisted record.
///
/// Generated client-side (v4) before persistence in batched mode, or assigned
/// by the store on an immediate write in unbatched mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A normalized field value.
///
/// The variant is decided by the schema's field descriptor, never inferred
/// from the shape of the raw value. Serializes untagged so persisted records
/// read as plain JSON: scalars stay scalars, references become id strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Raw scalar passed through unchanged
    Scalar(serde_json::Value),
    /// Ordered sequence of raw scalars, source order preserved
    ScalarArray(Vec<serde_json::Value>),
    /// Identifier of a normalized sub-record
    Ref(RecordId),
    /// Identifiers of normalized sub-records, source order preserved
    RefArray(Vec<RecordId>),
}

/// A typed record ready for persistence.
///
/// Absent source fields are omitted from `fields`, not stored as null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    /// Client-generated identifier (the store may override it on an
    /// immediate single write)
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl NormalizedRecord {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        Self {
            id: RecordId::new(),
            fields,
        }
    }
}

/// Summary of a completed (or cancelled) ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    /// Dataset name, e.g. "FoundationFoods"
    pub dataset: String,
    /// Root records processed, in source order
    pub records: u64,
    /// Sub-record builds skipped because an identical one was already stored
    pub cache_hits: u64,
    /// Bulk flush windows dispatched
    pub flushes: u64,
    /// Whether the run was cut short by a shutdown signal
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl IngestReport {
    /// Elapsed wall time as "3m 41s" / "17s"
    pub fn human_elapsed(&self) -> String {
        let total = self.elapsed_secs.round() as u64;
        let (mins, secs) = (total / 60, total % 60);
        if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}
