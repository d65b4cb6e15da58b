use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::{info, warn};

use crate::storage::{Filter, Record, RecordStore, StoreError, Table};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS sop_records (
    table_name TEXT NOT NULL,
    record_id TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (table_name, record_id)
)";

/// SQL-backed record store. Every record is one JSON document row keyed by
/// `(table_name, record_id)`; filtering happens after the fetch.
pub struct SqlRecordStore {
    pool: AnyPool,
}

impl SqlRecordStore {
    /// Connect to a database URL (e.g. `sqlite://data/sopflow.db?mode=rwc`) and
    /// create the records table when missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // Install any drivers that are compiled in
        sqlx::any::install_default_drivers();

        let pool = AnyPool::connect(url).await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        info!(url = %url, "Connected SQL record store");
        Ok(Self { pool })
    }

    fn decode(data: &str) -> Result<Record, StoreError> {
        Ok(serde_json::from_str(data)?)
    }
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn fetch_record(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query("SELECT data FROM sop_records WHERE table_name = ? AND record_id = ?")
            .bind(table.name())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(Self::decode(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_filtered(
        &self,
        table: Table,
        filter: &Filter,
    ) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(
            "SELECT record_id, data FROM sop_records WHERE table_name = ? ORDER BY record_id",
        )
        .bind(table.name())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("record_id")?;
            let data: String = row.try_get("data")?;
            match Self::decode(&data) {
                Ok(record) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(table = %table, id = %id, error = %e, "Skipping unreadable record"),
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
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT data FROM sop_records WHERE table_name = ? AND record_id = ?")
            .bind(table.name())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table,
                id: id.to_string(),
            })?;

        let data: String = row.try_get("data")?;
        let mut record = Self::decode(&data)?;
        record.extend(fields);

        sqlx::query("UPDATE sop_records SET data = ? WHERE table_name = ? AND record_id = ?")
            .bind(serde_json::to_string(&record)?)
            .bind(table.name())
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_record(&self, table: Table, record: Record) -> Result<String, StoreError> {
        let id = table.record_id(&record).ok_or(StoreError::MissingKey {
            table,
            field: table.primary_key(),
        })?;

        sqlx::query(
            "INSERT INTO sop_records (table_name, record_id, data) VALUES (?, ?, ?)
             ON CONFLICT (table_name, record_id) DO UPDATE SET data = excluded.data",
        )
        .bind(table.name())
        .bind(id.as_str())
        .bind(serde_json::to_string(&record)?)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }
}
