//! The per-step state machine: (step outcome × step definition) → task update.

use chrono::{DateTime, Utc};

use crate::engine::error::ExecutionError;
use crate::engine::types::{AgentTask, SopStep, StepResult, TaskStatus};
use crate::storage::TaskUpdate;

/// Whether the scheduler keeps polling a task after this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    Drop,
}

/// What happened to a task's step pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Moved on to the next step; still Running.
    Advanced { next_step_id: String },
    /// Final step succeeded.
    Completed,
    /// A wait step armed its timer.
    Waiting { until: DateTime<Utc> },
    /// The step failed and the task jumped to its error-handling step.
    Recovered { jump_to: String, error: String },
    /// The step failed with no error-handling step.
    Failed { error: String },
}

impl StepOutcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            StepOutcome::Completed | StepOutcome::Failed { .. } => Disposition::Drop,
            _ => Disposition::Keep,
        }
    }
}

/// A resolved transition: the outcome plus the fields to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub outcome: StepOutcome,
    pub update: TaskUpdate,
}

impl Transition {
    pub fn resolve(
        task: &AgentTask,
        step: &SopStep,
        result: Result<StepResult, ExecutionError>,
        now: DateTime<Utc>,
    ) -> Self {
        match result {
            Ok(result) => Self::success(task, step, result, now),
            Err(e) => Self::failure(task, step, &e),
        }
    }

    fn success(task: &AgentTask, step: &SopStep, result: StepResult, now: DateTime<Utc>) -> Self {
        let mut update = TaskUpdate::new()
            .last_result(result.tool_output)
            .error_message(None);

        if !result.environment_updates.is_empty() || task.environment_needs_repair() {
            let mut env = task.environment();
            env.extend(result.environment_updates);
            update = update.environment(env);
        }

        if let Some(message) = result.log_message {
            update = update.progress_details(prepend_progress(
                &task.progress_details,
                &message,
                now,
            ));
        }

        if let Some(until) = result.wait_until {
            return Self {
                outcome: StepOutcome::Waiting { until },
                update: update.status(TaskStatus::Waiting).wait_until(Some(until)),
            };
        }

        match &step.next_step_id {
            Some(next) => Self {
                outcome: StepOutcome::Advanced {
                    next_step_id: next.clone(),
                },
                update: update.current_step(next.clone()).status(TaskStatus::Running),
            },
            None => Self {
                outcome: StepOutcome::Completed,
                update: update.status(TaskStatus::Completed),
            },
        }
    }

    fn failure(task: &AgentTask, step: &SopStep, error: &ExecutionError) -> Self {
        let message = format!("Error in step {}: {}", step.step_id, error);
        let mut update = TaskUpdate::new()
            .last_result(None)
            .error_message(Some(message.clone()));
        if task.environment_needs_repair() {
            update = update.environment(task.environment());
        }

        match &step.error_handling_step_id {
            Some(jump_to) => Self {
                outcome: StepOutcome::Recovered {
                    jump_to: jump_to.clone(),
                    error: message,
                },
                update: update.current_step(jump_to.clone()).status(TaskStatus::Running),
            },
            None => Self {
                outcome: StepOutcome::Failed { error: message },
                update: update.status(TaskStatus::Error),
            },
        }
    }
}

/// Newest-first progress log: `[<rfc3339>] <message>` on top of prior lines.
pub fn prepend_progress(existing: &str, message: &str, now: DateTime<Utc>) -> String {
    let line = format!("[{}] {}", now.to_rfc3339(), message);
    let existing = existing.trim();
    if existing.is_empty() {
        line
    } else {
        format!("{}\n{}", line, existing)
    }
}
