use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::engine::types::{AgentTask, ControlSignal, Environment, SopStep, TaskStatus};
use crate::storage::{Filter, Record, RecordStore, StoreError, Table};

/// Map-typed step fields stored as JSON text.
const STEP_JSON_FIELDS: [&str; 3] = ["tool_params", "result_mapping", "environment_updates"];

/// A partial update of an agent task. Unset fields are left untouched.
///
/// Nested options distinguish "leave as is" (`None`) from "clear"
/// (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub control_signal: Option<ControlSignal>,
    pub current_step_id: Option<String>,
    pub current_environment: Option<Environment>,
    pub last_result: Option<Option<Value>>,
    pub wait_until: Option<Option<DateTime<Utc>>>,
    pub error_message: Option<Option<String>>,
    pub progress_details: Option<String>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn control_signal(mut self, signal: ControlSignal) -> Self {
        self.control_signal = Some(signal);
        self
    }

    pub fn current_step(mut self, step_id: impl Into<String>) -> Self {
        self.current_step_id = Some(step_id.into());
        self
    }

    pub fn environment(mut self, env: Environment) -> Self {
        self.current_environment = Some(env);
        self
    }

    pub fn last_result(mut self, result: Option<Value>) -> Self {
        self.last_result = Some(result);
        self
    }

    pub fn wait_until(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.wait_until = Some(at);
        self
    }

    pub fn error_message(mut self, message: Option<String>) -> Self {
        self.error_message = Some(message);
        self
    }

    pub fn progress_details(mut self, details: impl Into<String>) -> Self {
        self.progress_details = Some(details.into());
        self
    }

    /// Mark the task failed with a diagnostic.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new()
            .status(TaskStatus::Error)
            .error_message(Some(message.into()))
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Encode into store fields: maps and results as JSON text, times as
    /// RFC 3339, plus `last_updated`.
    pub fn into_fields(self, now: DateTime<Utc>) -> Record {
        let mut fields = Record::new();

        if let Some(status) = self.status {
            fields.insert("status".into(), Value::String(status.to_string()));
        }
        if let Some(signal) = self.control_signal {
            fields.insert("control_signal".into(), Value::String(signal.to_string()));
        }
        if let Some(step_id) = self.current_step_id {
            fields.insert("current_step_id".into(), Value::String(step_id));
        }
        if let Some(env) = self.current_environment {
            let object: serde_json::Map<String, Value> = env.into_iter().collect();
            fields.insert(
                "current_environment".into(),
                Value::String(Value::Object(object).to_string()),
            );
        }
        if let Some(result) = self.last_result {
            fields.insert(
                "last_result".into(),
                result.map_or(Value::Null, |v| Value::String(v.to_string())),
            );
        }
        if let Some(at) = self.wait_until {
            fields.insert(
                "wait_until".into(),
                at.map_or(Value::Null, |t| Value::String(t.to_rfc3339())),
            );
        }
        if let Some(message) = self.error_message {
            fields.insert(
                "error_message".into(),
                message.map_or(Value::Null, Value::String),
            );
        }
        if let Some(details) = self.progress_details {
            fields.insert("progress_details".into(), Value::String(details));
        }

        fields.insert("last_updated".into(), Value::String(now.to_rfc3339()));
        fields
    }
}

/// Typed access to agent tasks and SOP steps over a [`RecordStore`].
/// This is the boundary where JSON-text fields are decoded and encoded.
#[derive(Clone)]
pub struct TaskStore {
    records: Arc<dyn RecordStore>,
}

impl TaskStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> Arc<dyn RecordStore> {
        self.records.clone()
    }

    pub async fn fetch_task(&self, task_id: &str) -> Result<Option<AgentTask>, StoreError> {
        match self.records.fetch_record(Table::AgentTasks, task_id).await? {
            Some(record) => decode_task(task_id, record).map(Some),
            None => Ok(None),
        }
    }

    pub async fn fetch_step(&self, step_id: &str) -> Result<Option<SopStep>, StoreError> {
        match self.records.fetch_record(Table::SopSteps, step_id).await? {
            Some(record) => serde_json::from_value(Value::Object(record))
                .map(Some)
                .map_err(|e| StoreError::Decode {
                    table: Table::SopSteps,
                    id: step_id.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Ids of the agent's tasks whose status is one of `statuses`, in store order.
    pub async fn task_ids(
        &self,
        agent_name: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<String>, StoreError> {
        let filter = Filter::new()
            .eq("agent_name", agent_name)
            .any_of("status", statuses.iter().map(|s| s.to_string()));

        let records = self.records.fetch_filtered(Table::AgentTasks, &filter).await?;
        Ok(records
            .iter()
            .filter_map(|record| Table::AgentTasks.record_id(record))
            .collect())
    }

    /// List tasks, optionally scoped to an agent and a status.
    /// Records that fail to decode are skipped.
    pub async fn list_tasks(
        &self,
        agent_name: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Result<Vec<AgentTask>, StoreError> {
        let mut filter = Filter::new();
        if let Some(agent) = agent_name {
            filter = filter.eq("agent_name", agent);
        }
        if let Some(status) = status {
            filter = filter.eq("status", status.to_string());
        }

        let records = self.records.fetch_filtered(Table::AgentTasks, &filter).await?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let id = Table::AgentTasks.record_id(&record).unwrap_or_default();
                decode_task(&id, record).ok()
            })
            .collect())
    }

    /// Apply a partial update. Empty updates are not written.
    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        let fields = update.into_fields(Utc::now());
        self.records
            .update_fields(Table::AgentTasks, task_id, fields)
            .await
    }

    /// Create a new task record and return its id.
    pub async fn create_task(
        &self,
        task_id: &str,
        agent_name: &str,
        status: TaskStatus,
        start_step: Option<&str>,
        env: &Environment,
    ) -> Result<String, StoreError> {
        let object: serde_json::Map<String, Value> =
            env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        let mut record = Record::new();
        record.insert("task_id".into(), Value::String(task_id.to_string()));
        record.insert("agent_name".into(), Value::String(agent_name.to_string()));
        record.insert("status".into(), Value::String(status.to_string()));
        record.insert("control_signal".into(), Value::String("None".into()));
        record.insert(
            "current_step_id".into(),
            start_step.map_or(Value::Null, |s| Value::String(s.to_string())),
        );
        record.insert(
            "current_environment".into(),
            Value::String(Value::Object(object).to_string()),
        );
        record.insert("last_result".into(), Value::Null);
        record.insert("wait_until".into(), Value::Null);
        record.insert("error_message".into(), Value::Null);
        record.insert("progress_details".into(), Value::String(String::new()));
        record.insert("last_updated".into(), Value::String(Utc::now().to_rfc3339()));

        self.records.insert_record(Table::AgentTasks, record).await
    }

    /// Store a step definition. Map-typed fields given as JSON are encoded as
    /// JSON text, matching how steps are authored in the store.
    pub async fn put_step(&self, mut record: Record) -> Result<String, StoreError> {
        for field in STEP_JSON_FIELDS {
            if let Some(value) = record.get_mut(field)
                && (value.is_object() || value.is_array())
            {
                *value = Value::String(value.to_string());
            }
        }

        // Validate the shape before it lands in the store
        let id = Table::SopSteps.record_id(&record).ok_or(StoreError::MissingKey {
            table: Table::SopSteps,
            field: Table::SopSteps.primary_key(),
        })?;
        serde_json::from_value::<SopStep>(Value::Object(record.clone())).map_err(|e| {
            StoreError::Decode {
                table: Table::SopSteps,
                id,
                reason: e.to_string(),
            }
        })?;

        self.records.insert_record(Table::SopSteps, record).await
    }
}

fn decode_task(task_id: &str, record: Record) -> Result<AgentTask, StoreError> {
    serde_json::from_value(Value::Object(record)).map_err(|e| StoreError::Decode {
        table: Table::AgentTasks,
        id: task_id.to_string(),
        reason: e.to_string(),
    })
}
