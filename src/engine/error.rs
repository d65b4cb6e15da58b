use thiserror::Error;

use crate::storage::StoreError;

/// A step failed. Whether the task recovers depends on the step's
/// `error_handling_step_id`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unsupported action type: {action}")]
    UnsupportedAction { step_id: String, action: String },

    #[error("{reason}")]
    InvalidDefinition { step_id: String, reason: String },

    #[error("tool '{tool}' not found in agent's available tools")]
    ToolNotFound { step_id: String, tool: String },

    #[error("failed to serialize parameters for tool '{tool}': {source}")]
    InvalidParams {
        step_id: String,
        tool: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("tool '{tool}' failed: {message}")]
    ToolFailed {
        step_id: String,
        tool: String,
        message: String,
    },

    #[error("required result key '{key}' not found in tool output")]
    MissingRequiredResult { step_id: String, key: String },

    #[error("wait deadline is out of range")]
    WaitOutOfRange { step_id: String },
}

/// Startup and scheduler-level failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "Runtime cannot start for agent '{agent}': missing required tools: {}",
        missing.join(", ")
    )]
    MissingTools { agent: String, missing: Vec<String> },

    #[error(transparent)]
    Store(#[from] StoreError),
}
