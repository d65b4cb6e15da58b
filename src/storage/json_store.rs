use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::storage::{Filter, Record, RecordStore, StoreError, Table};

/// File-based JSON record store. Each table is a directory and each record a
/// separate JSON file named after its id.
pub struct JsonRecordStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonRecordStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn table_dir(&self, table: Table) -> PathBuf {
        self.base_dir.join(table.name())
    }

    fn record_path(&self, table: Table, id: &str) -> Result<PathBuf, StoreError> {
        let safe = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.table_dir(table).join(format!("{}.json", id)))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<Record>, StoreError> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    async fn write_record(&self, path: &Path, record: &Record) -> Result<(), StoreError> {
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn fetch_record(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError> {
        let _lock = self.lock.read().await;
        let path = match self.record_path(table, id) {
            Ok(path) => path,
            // An id that can't name a file can't exist in this store
            Err(StoreError::InvalidId(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.read_record(&path).await
    }

    async fn fetch_filtered(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        let _lock = self.lock.read().await;

        let dir = self.table_dir(table);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            match self.read_record(&path).await {
                Ok(Some(record)) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record file")
                }
            }
        }

        Ok(records)
    }

    async fn update_fields(
        &self,
        table: Table,
        id: &str,
        fields: Record,
    ) -> Result<(), StoreError> {
        let _lock = self.lock.write().await;
        let path = self.record_path(table, id)?;
        let mut record = self
            .read_record(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table,
                id: id.to_string(),
            })?;
        record.extend(fields);
        self.write_record(&path, &record).await
    }

    async fn insert_record(&self, table: Table, record: Record) -> Result<String, StoreError> {
        let _lock = self.lock.write().await;
        let id = table.record_id(&record).ok_or(StoreError::MissingKey {
            table,
            field: table.primary_key(),
        })?;
        let path = self.record_path(table, &id)?;

        // Ensure the directory exists
        tokio::fs::create_dir_all(self.table_dir(table)).await?;

        self.write_record(&path, &record).await?;
        Ok(id)
    }
}
