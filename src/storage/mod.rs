pub mod filter;
pub mod json_store;
pub mod memory_store;
pub mod sql_store;
pub mod task_store;

use async_trait::async_trait;
use thiserror::Error;

pub use filter::{Condition, Filter};
pub use task_store::{TaskStore, TaskUpdate};

/// A raw store record: field name → JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The two logical tables the runtime works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    AgentTasks,
    SopSteps,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::AgentTasks => "AgentTasks",
            Table::SopSteps => "SOP_Steps",
        }
    }

    /// Field holding each record's unique id.
    pub fn primary_key(self) -> &'static str {
        match self {
            Table::AgentTasks => "task_id",
            Table::SopSteps => "step_id",
        }
    }

    /// Extract a record's id from its primary key field.
    pub fn record_id(self, record: &Record) -> Option<String> {
        record
            .get(self.primary_key())
            .and_then(crate::engine::types::reference_id)
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "").as_str() {
            "agenttasks" | "agenttask" => Ok(Table::AgentTasks),
            "sopsteps" | "sopstep" => Ok(Table::SopSteps),
            _ => Err(format!("Unknown table: {}", s)),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record '{id}' not found in {table}")]
    NotFound { table: Table, id: String },

    #[error("invalid record id '{0}'")]
    InvalidId(String),

    #[error("record in {table} has no '{field}' field")]
    MissingKey { table: Table, field: &'static str },

    #[error("failed to decode {table} record '{id}': {reason}")]
    Decode {
        table: Table,
        id: String,
        reason: String,
    },

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store database error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// The narrow contract the runtime needs from a structured record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one record by id. `Ok(None)` when it does not exist.
    async fn fetch_record(&self, table: Table, id: &str) -> Result<Option<Record>, StoreError>;

    /// Fetch all records of a table matching `filter`, ordered by id.
    async fn fetch_filtered(&self, table: Table, filter: &Filter)
    -> Result<Vec<Record>, StoreError>;

    /// Merge `fields` into an existing record.
    async fn update_fields(&self, table: Table, id: &str, fields: Record)
    -> Result<(), StoreError>;

    /// Create or replace a whole record. Returns its id.
    async fn insert_record(&self, table: Table, record: Record) -> Result<String, StoreError>;
}
