//! In-memory store for tests and dry runs

use super::{RecordStore, StoreError};
use async_trait::async_trait;
use fdc_common::{NormalizedRecord, RecordId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<NormalizedRecord>>,
    bulk_calls: HashMap<String, usize>,
    fail_types: HashSet<String>,
}

/// [`RecordStore`] backed by per-type vectors.
///
/// Cloning is shallow; clones observe the same data. Individual types can be
/// marked as failing so flush-isolation behavior is testable.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every write for `type_name` fail
    pub fn failing_on(self, type_name: impl Into<String>) -> Self {
        self.lock().fail_types.insert(type_name.into());
        self
    }

    /// All records persisted for a type, in insertion order
    pub fn records(&self, type_name: &str) -> Vec<NormalizedRecord> {
        self.lock().tables.get(type_name).cloned().unwrap_or_default()
    }

    /// Number of records persisted for a type
    pub fn count(&self, type_name: &str) -> usize {
        self.lock().tables.get(type_name).map_or(0, Vec::len)
    }

    /// Number of bulk writes dispatched for a type
    pub fn bulk_calls(&self, type_name: &str) -> usize {
        self.lock().bulk_calls.get(type_name).copied().unwrap_or(0)
    }

    /// Total records persisted across all types
    pub fn total(&self) -> usize {
        self.lock().tables.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn bulk_insert(
        &self,
        type_name: &str,
        records: Vec<NormalizedRecord>,
    ) -> Result<Vec<RecordId>, StoreError> {
        let mut inner = self.lock();
        *inner.bulk_calls.entry(type_name.to_string()).or_default() += 1;
        if inner.fail_types.contains(type_name) {
            return Err(StoreError::Rejected {
                type_name: type_name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let ids = records.iter().map(|r| r.id).collect();
        inner
            .tables
            .entry(type_name.to_string())
            .or_default()
            .extend(records);
        Ok(ids)
    }

    async fn insert_one(
        &self,
        type_name: &str,
        mut record: NormalizedRecord,
    ) -> Result<RecordId, StoreError> {
        let mut inner = self.lock();
        if inner.fail_types.contains(type_name) {
            return Err(StoreError::Rejected {
                type_name: type_name.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        // Immediate writes hand out store-assigned identifiers.
        let id = RecordId::new();
        record.id = id;
        inner
            .tables
            .entry(type_name.to_string())
            .or_default()
            .push(record);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record() -> NormalizedRecord {
        NormalizedRecord::new(BTreeMap::new())
    }

    #[tokio::test]
    async fn test_bulk_insert_preserves_order_and_ids() {
        let store = MemoryStore::new();
        let records = vec![record(), record(), record()];
        let expected: Vec<RecordId> = records.iter().map(|r| r.id).collect();

        let ids = store.bulk_insert("Nutrient", records).await.unwrap();
        assert_eq!(ids, expected);
        assert_eq!(store.count("Nutrient"), 3);
        assert_eq!(store.bulk_calls("Nutrient"), 1);
    }

    #[tokio::test]
    async fn test_insert_one_assigns_fresh_id() {
        let store = MemoryStore::new();
        let original = record();
        let client_id = original.id;

        let assigned = store.insert_one("Nutrient", original).await.unwrap();
        assert_ne!(assigned, client_id);
        assert_eq!(store.records("Nutrient")[0].id, assigned);
    }

    #[tokio::test]
    async fn test_injected_failure_only_hits_marked_type() {
        let store = MemoryStore::new().failing_on("Nutrient");

        let err = store
            .bulk_insert("Nutrient", vec![record()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));

        store
            .bulk_insert("FoodNutrient", vec![record()])
            .await
            .unwrap();
        assert_eq!(store.count("FoodNutrient"), 1);
        assert_eq!(store.count("Nutrient"), 0);
    }
}
