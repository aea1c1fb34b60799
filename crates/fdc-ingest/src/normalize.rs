//! Record normalization: the materialize protocol
//!
//! [`Materializer::materialize`] turns one raw source record into typed,
//! persisted sub-records and returns its identifier:
//!
//! 1. Non-root records are looked up in the dedup index first; a hit returns
//!    the cached identifier without visiting the record's fields at all.
//! 2. On a miss the type's descriptor drives an exhaustive walk: scalars and
//!    scalar arrays pass through unchanged, reference fields recurse into
//!    this same protocol and store identifiers instead of values.
//! 3. The assembled record is handed to the batcher, and (for non-roots)
//!    the dedup index learns the new identifier.
//!
//! Root records bypass deduplication entirely: two identical source records
//! are two records.

use crate::batch::WriteBatcher;
use crate::dedup::{DedupIndex, DedupKey};
use crate::error::IngestError;
use crate::schema::{FieldKind, SchemaCache, SchemaRegistry};
use crate::store::RecordStore;
use fdc_common::{FieldValue, NormalizedRecord, RawRecord, RecordId};
use futures::future::BoxFuture;
use std::collections::BTreeMap;

pub struct Materializer<R, S> {
    schemas: SchemaCache<R>,
    dedup: DedupIndex,
    batcher: WriteBatcher<S>,
    root_type: String,
    cache_hits: u64,
}

impl<R, S> Materializer<R, S>
where
    R: SchemaRegistry + Send,
    S: RecordStore,
{
    pub fn new(
        schemas: SchemaCache<R>,
        dedup: DedupIndex,
        batcher: WriteBatcher<S>,
        root_type: impl Into<String>,
    ) -> Self {
        Self {
            schemas,
            dedup,
            batcher,
            root_type: root_type.into(),
            cache_hits: 0,
        }
    }

    /// Sub-record builds skipped so far because the dedup index already had
    /// an identical record
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn batcher_mut(&mut self) -> &mut WriteBatcher<S> {
        &mut self.batcher
    }

    /// Normalize `raw` as a record of `type_name` and return its identifier.
    ///
    /// Boxed because reference fields recurse back into this method.
    pub fn materialize<'a>(
        &'a mut self,
        raw: &'a RawRecord,
        type_name: &'a str,
    ) -> BoxFuture<'a, Result<RecordId, IngestError>> {
        Box::pin(async move {
            let root = type_name == self.root_type;

            let key = if root {
                // Roots are never deduplicated; the sentinel key is a
                // permanent miss.
                DedupKey::MISS
            } else {
                self.dedup.hash(raw)
            };
            if let Some(id) = self.dedup.lookup(type_name, key) {
                self.cache_hits += 1;
                return Ok(id);
            }

            let descriptor = self.schemas.get(type_name)?;
            let raw_fields = raw.as_object().ok_or_else(|| {
                IngestError::MalformedRecord {
                    type_name: type_name.to_string(),
                    reason: "expected a JSON object".to_string(),
                }
            })?;

            let mut fields = BTreeMap::new();
            for (field_name, kind) in &descriptor.fields {
                match kind {
                    FieldKind::Scalar => {
                        // Absent means omitted; a present null passes through.
                        if let Some(value) = raw_fields.get(field_name) {
                            fields.insert(field_name.clone(), FieldValue::Scalar(value.clone()));
                        }
                    },
                    FieldKind::ScalarArray => {
                        let items = match raw_fields.get(field_name) {
                            None | Some(RawRecord::Null) => Vec::new(),
                            Some(RawRecord::Array(items)) => items.clone(),
                            Some(_) => {
                                return Err(IngestError::MalformedRecord {
                                    type_name: type_name.to_string(),
                                    reason: format!("field '{field_name}' is not an array"),
                                })
                            },
                        };
                        fields.insert(field_name.clone(), FieldValue::ScalarArray(items));
                    },
                    FieldKind::Reference { target } => {
                        // Absent or null reference targets are passed through
                        // as an omitted field, not raised as an error.
                        match raw_fields.get(field_name) {
                            None | Some(RawRecord::Null) => {},
                            Some(value) => {
                                let id = self.materialize(value, target).await?;
                                fields.insert(field_name.clone(), FieldValue::Ref(id));
                            },
                        }
                    },
                    FieldKind::ReferenceArray { target } => {
                        let mut ids = Vec::new();
                        match raw_fields.get(field_name) {
                            None | Some(RawRecord::Null) => {},
                            Some(RawRecord::Array(items)) => {
                                for item in items {
                                    ids.push(self.materialize(item, target).await?);
                                }
                            },
                            Some(_) => {
                                return Err(IngestError::MalformedRecord {
                                    type_name: type_name.to_string(),
                                    reason: format!("field '{field_name}' is not an array"),
                                })
                            },
                        }
                        fields.insert(field_name.clone(), FieldValue::RefArray(ids));
                    },
                }
            }

            let record = NormalizedRecord::new(fields);
            let id = self.batcher.enqueue(type_name, record).await?;
            if !root {
                self.dedup.insert(type_name, key, id);
            }
            Ok(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticRegistry;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    const ROOT: &str = "FoundationFoodItem";

    fn registry() -> StaticRegistry {
        StaticRegistry::from_value(json!({
            "root_types": [ROOT],
            "types": {
                "FoundationFoodItem": {
                    "description": { "kind": "scalar" },
                    "foodClass": { "kind": "scalar" },
                    "foodNutrients": { "kind": "reference_array", "target": "FoodNutrient" },
                    "foodCategory": { "kind": "reference", "target": "FoodCategory" }
                },
                "FoodNutrient": {
                    "amount": { "kind": "scalar" },
                    "nutrient": { "kind": "reference", "target": "Nutrient" }
                },
                "Nutrient": {
                    "name": { "kind": "scalar" },
                    "unitName": { "kind": "scalar" }
                },
                "FoodCategory": {
                    "description": { "kind": "scalar" }
                }
            }
        }))
        .unwrap()
    }

    fn materializer(store: &MemoryStore, link: bool) -> Materializer<StaticRegistry, MemoryStore> {
        Materializer::new(
            SchemaCache::new(registry()),
            DedupIndex::new(link),
            WriteBatcher::new(Arc::new(store.clone()), true, 100),
            ROOT,
        )
    }

    async fn drain(m: &mut Materializer<StaticRegistry, MemoryStore>) {
        m.batcher_mut().flush().await.unwrap();
        let failures = m.batcher_mut().wait_for_completion().await.unwrap();
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn test_scalars_pass_through_and_absent_fields_are_omitted() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let raw = json!({"description": "Butter, salted", "ignoredField": 42});
        m.materialize(&raw, ROOT).await.unwrap();
        drain(&mut m).await;

        let records = store.records(ROOT);
        assert_eq!(records.len(), 1);
        let fields = &records[0].fields;
        assert_eq!(
            fields.get("description"),
            Some(&FieldValue::Scalar(json!("Butter, salted")))
        );
        // Not in the schema: dropped. Not in the source: omitted, not null.
        assert!(!fields.contains_key("ignoredField"));
        assert!(!fields.contains_key("foodClass"));
        // Absent reference array becomes an empty sequence.
        assert_eq!(
            fields.get("foodNutrients"),
            Some(&FieldValue::RefArray(Vec::new()))
        );
    }

    #[tokio::test]
    async fn test_dedup_idempotence_for_sub_records() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let nutrient = json!({"name": "Protein", "unitName": "g"});
        let first = m.materialize(&nutrient, "Nutrient").await.unwrap();
        let second = m.materialize(&nutrient, "Nutrient").await.unwrap();
        drain(&mut m).await;

        assert_eq!(first, second);
        assert_eq!(m.cache_hits(), 1);
        assert_eq!(store.count("Nutrient"), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_descendants() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        // Identical FoodNutrient twice: the nested Nutrient must be visited
        // only once, so only one cache hit total (for the FoodNutrient).
        let raw = json!({"amount": 1.5, "nutrient": {"name": "Protein", "unitName": "g"}});
        m.materialize(&raw, "FoodNutrient").await.unwrap();
        m.materialize(&raw, "FoodNutrient").await.unwrap();
        drain(&mut m).await;

        assert_eq!(m.cache_hits(), 1);
        assert_eq!(store.count("FoodNutrient"), 1);
        assert_eq!(store.count("Nutrient"), 1);
    }

    #[tokio::test]
    async fn test_root_records_are_never_deduplicated() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let raw = json!({"description": "Butter, salted"});
        let first = m.materialize(&raw, ROOT).await.unwrap();
        let second = m.materialize(&raw, ROOT).await.unwrap();
        drain(&mut m).await;

        assert_ne!(first, second);
        assert_eq!(m.cache_hits(), 0);
        assert_eq!(store.count(ROOT), 2);
    }

    #[tokio::test]
    async fn test_disabled_dedup_builds_every_sub_record() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, false);

        let nutrient = json!({"name": "Protein", "unitName": "g"});
        let first = m.materialize(&nutrient, "Nutrient").await.unwrap();
        let second = m.materialize(&nutrient, "Nutrient").await.unwrap();
        drain(&mut m).await;

        assert_ne!(first, second);
        assert_eq!(m.cache_hits(), 0);
        assert_eq!(store.count("Nutrient"), 2);
    }

    #[tokio::test]
    async fn test_reference_array_preserves_source_order() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let raw = json!({
            "description": "Butter, salted",
            "foodNutrients": [
                {"amount": 1.0, "nutrient": {"name": "Protein", "unitName": "g"}},
                {"amount": 2.0, "nutrient": {"name": "Fat", "unitName": "g"}},
                {"amount": 3.0, "nutrient": {"name": "Water", "unitName": "g"}}
            ]
        });
        m.materialize(&raw, ROOT).await.unwrap();
        drain(&mut m).await;

        let stored: Vec<RecordId> = store.records("FoodNutrient").iter().map(|r| r.id).collect();
        let root = &store.records(ROOT)[0];
        match root.fields.get("foodNutrients") {
            Some(FieldValue::RefArray(ids)) => assert_eq!(ids, &stored),
            other => panic!("expected RefArray, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_null_reference_is_omitted_not_an_error() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let raw = json!({"description": "Butter, salted", "foodCategory": null});
        m.materialize(&raw, ROOT).await.unwrap();
        drain(&mut m).await;

        let root = &store.records(ROOT)[0];
        assert!(!root.fields.contains_key("foodCategory"));
        assert_eq!(store.count("FoodCategory"), 0);
    }

    #[tokio::test]
    async fn test_non_object_reference_target_is_malformed() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let raw = json!({"description": "Butter, salted", "foodCategory": "Dairy"});
        let err = m.materialize(&raw, ROOT).await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedRecord { .. }));
    }

    #[tokio::test]
    async fn test_unknown_type_is_fatal() {
        let store = MemoryStore::new();
        let mut m = materializer(&store, true);

        let err = m.materialize(&json!({}), "NoSuchType").await.unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
    }
}
