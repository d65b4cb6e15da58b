use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::engine::error::ExecutionError;

/// A task's working memory: accumulated key/value pairs shared between steps.
pub type Environment = BTreeMap<String, Value>;

/// Lifecycle status of an agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[serde(alias = "pending")]
    Pending,
    #[serde(alias = "running")]
    Running,
    #[serde(alias = "waiting")]
    Waiting,
    #[serde(alias = "paused")]
    Paused,
    #[serde(alias = "stopped")]
    Stopped,
    #[serde(alias = "completed")]
    Completed,
    #[serde(alias = "error")]
    Error,
}

impl TaskStatus {
    /// Statuses the runtime resumes tracking on startup.
    pub const ACTIVE: [TaskStatus; 4] = [
        TaskStatus::Running,
        TaskStatus::Waiting,
        TaskStatus::Paused,
        TaskStatus::Pending,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Stopped | TaskStatus::Error
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::Running => write!(f, "Running"),
            TaskStatus::Waiting => write!(f, "Waiting"),
            TaskStatus::Paused => write!(f, "Paused"),
            TaskStatus::Stopped => write!(f, "Stopped"),
            TaskStatus::Completed => write!(f, "Completed"),
            TaskStatus::Error => write!(f, "Error"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "waiting" => Ok(TaskStatus::Waiting),
            "paused" => Ok(TaskStatus::Paused),
            "stopped" => Ok(TaskStatus::Stopped),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("Invalid task status: {}", other)),
        }
    }
}

/// Operator-set flag, consumed (reset to `None`) by the runtime on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlSignal {
    #[default]
    #[serde(alias = "none", alias = "")]
    None,
    #[serde(alias = "pause")]
    Pause,
    #[serde(alias = "stop")]
    Stop,
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlSignal::None => write!(f, "None"),
            ControlSignal::Pause => write!(f, "Pause"),
            ControlSignal::Stop => write!(f, "Stop"),
        }
    }
}

/// One running workflow instance, as stored in the `AgentTasks` table.
///
/// `current_environment` and `last_result` are kept as they came from the
/// store (usually JSON text) and decoded on demand through
/// [`AgentTask::environment`] and [`AgentTask::prior_result`], which repair
/// corrupt content instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    #[serde(deserialize_with = "required_id")]
    pub task_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub agent_name: String,
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub control_signal: ControlSignal,
    #[serde(default, deserialize_with = "step_ref")]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub current_environment: Value,
    #[serde(default)]
    pub last_result: Value,
    #[serde(default, deserialize_with = "lenient_text")]
    pub wait_until: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error_message: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress_details: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub last_updated: Option<String>,
}

impl AgentTask {
    /// Decode the working environment, resetting it to empty when corrupt.
    pub fn environment(&self) -> Environment {
        decode_environment(&self.current_environment, &self.task_id)
    }

    /// True when the stored environment is neither absent nor a map, so the
    /// next write must replace it with the reset value.
    pub fn environment_needs_repair(&self) -> bool {
        match &self.current_environment {
            Value::Null | Value::Object(_) => false,
            Value::String(text) if text.trim().is_empty() => false,
            Value::String(text) => {
                !matches!(serde_json::from_str::<Value>(text), Ok(Value::Object(_)))
            }
            _ => true,
        }
    }

    /// Decode the previous step's tool output. Unparseable text is treated as absent.
    pub fn prior_result(&self) -> Option<Value> {
        match &self.last_result {
            Value::Null => None,
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Null) => None,
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        task_id = %self.task_id,
                        error = %e,
                        "last_result is not valid JSON, treating as absent"
                    );
                    None
                }
            },
            other => Some(other.clone()),
        }
    }
}

/// Decode an environment field. Anything other than a JSON object (or JSON text
/// holding one) is logged and replaced with an empty map.
pub fn decode_environment(raw: &Value, task_id: &str) -> Environment {
    match raw {
        Value::Null => Environment::new(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::String(text) if text.trim().is_empty() => Environment::new(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            Ok(other) => {
                warn!(
                    task_id = %task_id,
                    content = %other,
                    "current_environment is not a map, resetting to empty"
                );
                Environment::new()
            }
            Err(e) => {
                warn!(
                    task_id = %task_id,
                    error = %e,
                    "Failed to parse current_environment, resetting to empty"
                );
                Environment::new()
            }
        },
        other => {
            warn!(
                task_id = %task_id,
                content = %other,
                "current_environment has unexpected type, resetting to empty"
            );
            Environment::new()
        }
    }
}

/// Treat a value as a JSON object, decoding JSON text when necessary.
pub fn as_json_map(value: &Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// Parse an ISO-8601 timestamp. Offset-less values are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// One step of an SOP, as stored in the `SOP_Steps` table.
///
/// Action-specific fields stay loosely typed here; [`SopStep::decode_action`]
/// turns them into a [`StepAction`] when the step is executed so that a
/// malformed definition fails that step rather than the fetch.
#[derive(Debug, Clone, Deserialize)]
pub struct SopStep {
    #[serde(deserialize_with = "required_id")]
    pub step_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_params: Value,
    #[serde(default)]
    pub result_mapping: Value,
    #[serde(default)]
    pub duration_seconds: Value,
    #[serde(default)]
    pub environment_updates: Value,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message_template: Option<String>,
    #[serde(default, deserialize_with = "step_ref")]
    pub next_step_id: Option<String>,
    #[serde(default, deserialize_with = "step_ref")]
    pub error_handling_step_id: Option<String>,
}

impl SopStep {
    pub fn is_wait(&self) -> bool {
        self.action == "wait"
    }

    /// Interpret the loosely-typed definition as a concrete action.
    pub fn decode_action(&self) -> Result<StepAction, ExecutionError> {
        let invalid = |reason: String| ExecutionError::InvalidDefinition {
            step_id: self.step_id.clone(),
            reason,
        };

        match self.action.as_str() {
            "call_tool" => {
                let tool_name = self
                    .tool_name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .ok_or_else(|| invalid("missing 'tool_name' for call_tool action".into()))?;

                let params = match decode_json_field(&self.tool_params)
                    .map_err(|e| invalid(format!("invalid JSON in tool_params: {}", e)))?
                {
                    Value::Null => Vec::new(),
                    Value::Object(map) => map
                        .iter()
                        .map(|(name, def)| {
                            Binding::from_param(def)
                                .map(|b| (name.clone(), b))
                                .map_err(|e| invalid(format!("parameter '{}': {}", name, e)))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(invalid("tool_params must be an object".into())),
                };

                let result_mapping = match decode_json_field(&self.result_mapping)
                    .map_err(|e| invalid(format!("invalid JSON in result_mapping: {}", e)))?
                {
                    Value::Null => Vec::new(),
                    Value::Array(entries) => entries
                        .iter()
                        .filter(|entry| entry.is_object())
                        .map(|entry| {
                            serde_json::from_value::<ResultMapping>(entry.clone()).map_err(|e| {
                                invalid(format!("invalid result_mapping entry {}: {}", entry, e))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?
                        .into_iter()
                        .filter(|m| !m.source_key.is_empty() && !m.target_key.is_empty())
                        .collect(),
                    _ => return Err(invalid("result_mapping must be a list".into())),
                };

                Ok(StepAction::CallTool {
                    tool_name,
                    params,
                    result_mapping,
                })
            }
            "wait" => {
                let seconds = match &self.duration_seconds {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    invalid("invalid or missing 'duration_seconds' for wait action".into())
                })?;

                let duration = TimeDelta::try_milliseconds((seconds * 1000.0).round() as i64)
                    .ok_or_else(|| invalid(format!("wait duration out of range: {}", seconds)))?;

                Ok(StepAction::Wait { duration })
            }
            "update_environment" => {
                let updates = match decode_json_field(&self.environment_updates)
                    .map_err(|e| invalid(format!("invalid JSON in environment_updates: {}", e)))?
                {
                    Value::Null => Vec::new(),
                    Value::Object(map) => map
                        .iter()
                        .map(|(target, def)| {
                            Binding::from_update(def)
                                .map(|b| (target.clone(), b))
                                .map_err(|e| invalid(format!("update '{}': {}", target, e)))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(invalid("environment_updates must be an object".into())),
                };
                Ok(StepAction::UpdateEnvironment { updates })
            }
            "log_message" => Ok(StepAction::LogMessage {
                template: self.message_template.clone().unwrap_or_default(),
            }),
            other => Err(ExecutionError::UnsupportedAction {
                step_id: self.step_id.clone(),
                action: other.to_string(),
            }),
        }
    }
}

/// Map-typed step fields arrive either as JSON or as JSON text.
fn decode_json_field(raw: &Value) -> Result<Value, serde_json::Error> {
    match raw {
        Value::String(text) if text.trim().is_empty() => Ok(Value::Null),
        Value::String(text) => serde_json::from_str(text),
        other => Ok(other.clone()),
    }
}

/// A decoded step action.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    CallTool {
        tool_name: String,
        params: Vec<(String, Binding)>,
        result_mapping: Vec<ResultMapping>,
    },
    Wait {
        duration: TimeDelta,
    },
    UpdateEnvironment {
        updates: Vec<(String, Binding)>,
    },
    LogMessage {
        template: String,
    },
}

/// Where a parameter or environment update takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Literal(Value),
    Environment(String),
    PriorStepResult(String),
    Null,
}

impl Binding {
    /// Tool parameters must be descriptor objects.
    pub fn from_param(def: &Value) -> Result<Self, String> {
        match def {
            Value::Object(map) => Self::from_descriptor(map),
            _ => Err("invalid parameter definition format".into()),
        }
    }

    /// Environment updates also accept a bare literal or an explicit null.
    pub fn from_update(def: &Value) -> Result<Self, String> {
        match def {
            Value::Null => Ok(Binding::Null),
            Value::Object(map) => Self::from_descriptor(map),
            other => Ok(Binding::Literal(other.clone())),
        }
    }

    fn from_descriptor(map: &serde_json::Map<String, Value>) -> Result<Self, String> {
        if let Some(value) = map.get("value") {
            return Ok(Binding::Literal(value.clone()));
        }

        let source = map
            .get("source")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "descriptor needs either 'value' or 'source'".to_string())?;

        let key = map
            .get("key")
            .and_then(|v| v.as_str())
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .ok_or_else(|| format!("missing 'key' for {} source", source))?;

        match source {
            "environment" | "env" => Ok(Binding::Environment(key)),
            "prior_step_result" => Ok(Binding::PriorStepResult(key)),
            other => Err(format!("unknown source '{}'", other)),
        }
    }

    /// Missing keys resolve to null.
    pub fn resolve(
        &self,
        env: &Environment,
        prior: Option<&serde_json::Map<String, Value>>,
    ) -> Value {
        match self {
            Binding::Literal(value) => value.clone(),
            Binding::Environment(key) => env.get(key).cloned().unwrap_or(Value::Null),
            Binding::PriorStepResult(key) => prior
                .and_then(|map| map.get(key))
                .cloned()
                .unwrap_or(Value::Null),
            Binding::Null => Value::Null,
        }
    }
}

/// Copies one field of a tool's JSON output into the environment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultMapping {
    #[serde(default)]
    pub source_key: String,
    #[serde(default)]
    pub target_key: String,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub required: bool,
}

/// What a single step execution produced. The scheduler persists it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
    pub tool_output: Option<Value>,
    pub environment_updates: Environment,
    pub log_message: Option<String>,
    pub wait_until: Option<DateTime<Utc>>,
}

// --- Lenient field decoding for store records ---

/// Step references may be a plain id, a number, or a link object `{ "id": ... }`.
pub fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get("id").and_then(reference_id),
        _ => None,
    }
}

fn step_ref<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(reference_id))
}

fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    reference_id(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid record id: {}", value)))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Truthiness for flags written by hand into records: `"true"`, `1` and `"yes"`
/// all count, `"false"`, `0`, `"no"` and empty values do not.
fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "no" | "off" | "0"
        ),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
