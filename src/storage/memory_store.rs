use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::storage::{Filter, Record, RecordStore, StoreError, Table};

/// In-memory record store. Holds records only for the lifetime of the instance.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<HashMap<Table, BTreeMap<String, Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_record(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|rows| rows.get(id)).cloned())
    }

    async fn fetch_filtered(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|record| filter.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update_fields(
        &self,
        table: Table,
        id: &str,
        fields: Record,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                table,
                id: id.to_string(),
            })?;
        record.extend(fields);
        Ok(())
    }

    async fn insert_record(&self, table: Table, record: Record) -> Result<String, StoreError> {
        let id = table.record_id(&record).ok_or(StoreError::MissingKey {
            table,
            field: table.primary_key(),
        })?;
        self.tables
            .write()
            .await
            .entry(table)
            .or_default()
            .insert(id.clone(), record);
        Ok(id)
    }
}
