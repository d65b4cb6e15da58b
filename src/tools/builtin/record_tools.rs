use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::storage::{Filter, RecordStore, Table};
use crate::tools::{Tool, parse_params};

fn table_param(params: &Map<String, Value>) -> Result<Table> {
    let name = params
        .get("table_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("'table_name' must be a string"))?;
    name.parse::<Table>().map_err(|e| anyhow::anyhow!(e))
}

fn row_id_param(params: &Map<String, Value>) -> Option<String> {
    params
        .get("row_id")
        .and_then(crate::engine::types::reference_id)
}

/// Read records from the task store: one by `row_id`, or all matching `filter`.
pub struct RetrieveRecordsTool {
    records: Arc<dyn RecordStore>,
}

impl RetrieveRecordsTool {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for RetrieveRecordsTool {
    fn name(&self) -> &str {
        "retrieve_records"
    }

    fn description(&self) -> &str {
        "Fetch task-store records by row_id or by a field filter"
    }

    fn required_params(&self) -> &[&'static str] {
        &["table_name"]
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, self.required_params())?;
        let table = table_param(&params)?;

        if let Some(row_id) = row_id_param(&params) {
            return match self.records.fetch_record(table, &row_id).await? {
                Some(record) => Ok(Value::Object(record)),
                None => anyhow::bail!("Record '{}' not found in {}", row_id, table),
            };
        }

        let filter = match params.get("filter") {
            Some(raw) => Filter::from_json(raw).map_err(|e| anyhow::anyhow!(e))?,
            None => Filter::new(),
        };

        let list = self.records.fetch_filtered(table, &filter).await?;
        let count = list.len();
        Ok(json!({
            "list": list.into_iter().map(Value::Object).collect::<Vec<_>>(),
            "count": count,
        }))
    }
}

/// Update fields of one task-store record.
pub struct UpdateRecordsTool {
    records: Arc<dyn RecordStore>,
}

impl UpdateRecordsTool {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Tool for UpdateRecordsTool {
    fn name(&self) -> &str {
        "update_records"
    }

    fn description(&self) -> &str {
        "Update fields of a task-store record identified by row_id"
    }

    fn required_params(&self) -> &[&'static str] {
        &["table_name", "row_id", "data"]
    }

    async fn invoke(&self, params: &str) -> Result<Value> {
        let params = parse_params(params, self.required_params())?;
        let table = table_param(&params)?;
        let row_id =
            row_id_param(&params).ok_or_else(|| anyhow::anyhow!("'row_id' must be an id"))?;
        let data = params
            .get("data")
            .and_then(|v| v.as_object())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("'data' must be an object"))?;

        let fields = data.len();
        self.records.update_fields(table, &row_id, data).await?;

        Ok(json!({ "updated": row_id, "fields": fields }))
    }
}
