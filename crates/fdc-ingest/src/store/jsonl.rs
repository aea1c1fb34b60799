//! JSON-lines store: one append-only file per record type

use super::{RecordStore, StoreError};
use async_trait::async_trait;
use fdc_common::{NormalizedRecord, RecordId};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// [`RecordStore`] that appends records to `<dir>/<type>.jsonl`.
///
/// Writes for different types may run concurrently; writes for the same type
/// are serialized by the engine (one flush in flight at a time), so the
/// files need no locking.
#[derive(Clone)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, type_name: &str) -> PathBuf {
        self.dir.join(format!("{type_name}.jsonl"))
    }

    async fn append(&self, type_name: &str, lines: String) -> Result<(), StoreError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(type_name))
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    async fn bulk_insert(
        &self,
        type_name: &str,
        records: Vec<NormalizedRecord>,
    ) -> Result<Vec<RecordId>, StoreError> {
        let mut lines = String::new();
        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            lines.push_str(&serde_json::to_string(record)?);
            lines.push('\n');
            ids.push(record.id);
        }
        self.append(type_name, lines).await?;
        Ok(ids)
    }

    async fn insert_one(
        &self,
        type_name: &str,
        record: NormalizedRecord,
    ) -> Result<RecordId, StoreError> {
        let id = record.id;
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        self.append(type_name, line).await?;
        Ok(id)
    }
}
