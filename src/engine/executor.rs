use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::engine::error::ExecutionError;
use crate::engine::template::render_template;
use crate::engine::types::*;
use crate::tools::ToolRegistry;

/// Interprets one SOP step against one task's current state.
///
/// The executor never persists anything; apart from the single tool call of a
/// `call_tool` step it has no side effects.
pub struct StepExecutor {
    registry: Arc<ToolRegistry>,
}

impl StepExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute `step` for `task`. `now` anchors wait deadlines.
    pub async fn execute(
        &self,
        task: &AgentTask,
        step: &SopStep,
        now: DateTime<Utc>,
    ) -> Result<StepResult, ExecutionError> {
        let action = step.decode_action()?;
        let env = task.environment();

        match action {
            StepAction::CallTool {
                tool_name,
                params,
                result_mapping,
            } => {
                self.call_tool(task, step, &env, &tool_name, &params, &result_mapping)
                    .await
            }
            StepAction::Wait { duration } => {
                let wait_until = now
                    .checked_add_signed(duration)
                    .ok_or_else(|| ExecutionError::WaitOutOfRange {
                        step_id: step.step_id.clone(),
                    })?;
                Ok(StepResult {
                    wait_until: Some(wait_until),
                    ..Default::default()
                })
            }
            StepAction::UpdateEnvironment { updates } => {
                let prior = task.prior_result().as_ref().and_then(as_json_map);
                let environment_updates = updates
                    .iter()
                    .map(|(target, binding)| {
                        (target.clone(), binding.resolve(&env, prior.as_ref()))
                    })
                    .collect();
                Ok(StepResult {
                    environment_updates,
                    ..Default::default()
                })
            }
            StepAction::LogMessage { template } => {
                let message = render_template(&template, &env);
                info!(task_id = %task.task_id, step_id = %step.step_id, "{}", message);
                Ok(StepResult {
                    log_message: Some(message),
                    ..Default::default()
                })
            }
        }
    }

    async fn call_tool(
        &self,
        task: &AgentTask,
        step: &SopStep,
        env: &Environment,
        tool_name: &str,
        params: &[(String, Binding)],
        result_mapping: &[ResultMapping],
    ) -> Result<StepResult, ExecutionError> {
        let prior = task.prior_result();
        let prior_map = prior.as_ref().and_then(as_json_map);
        if prior.is_some() && prior_map.is_none() && params_need_prior(params) {
            warn!(
                task_id = %task.task_id,
                step_id = %step.step_id,
                "prior_step_result is not a map, its bindings resolve to null"
            );
        }

        let resolved: Map<String, Value> = params
            .iter()
            .map(|(name, binding)| (name.clone(), binding.resolve(env, prior_map.as_ref())))
            .collect();

        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ExecutionError::ToolNotFound {
                step_id: step.step_id.clone(),
                tool: tool_name.to_string(),
            })?;

        let params_json = serde_json::to_string(&resolved).map_err(|source| {
            ExecutionError::InvalidParams {
                step_id: step.step_id.clone(),
                tool: tool_name.to_string(),
                source,
            }
        })?;

        debug!(
            task_id = %task.task_id,
            step_id = %step.step_id,
            tool = %tool_name,
            params = %params_json,
            "Calling tool"
        );

        let output = tool
            .invoke(&params_json)
            .await
            .map_err(|e| ExecutionError::ToolFailed {
                step_id: step.step_id.clone(),
                tool: tool_name.to_string(),
                message: format!("{:#}", e),
            })?;

        debug!(task_id = %task.task_id, tool = %tool_name, output = %output, "Tool returned");

        let environment_updates = apply_result_mapping(step, &output, result_mapping)?;

        Ok(StepResult {
            tool_output: Some(output),
            environment_updates,
            ..Default::default()
        })
    }
}

fn params_need_prior(params: &[(String, Binding)]) -> bool {
    params
        .iter()
        .any(|(_, b)| matches!(b, Binding::PriorStepResult(_)))
}

/// Copy mapped fields of a tool's output into environment deltas.
/// Output that is not a JSON map produces no deltas, and then only
/// `required` entries fail.
fn apply_result_mapping(
    step: &SopStep,
    output: &Value,
    mappings: &[ResultMapping],
) -> Result<Environment, ExecutionError> {
    let mut updates = Environment::new();
    if mappings.is_empty() {
        return Ok(updates);
    }

    let output_map = as_json_map(output);
    if output_map.is_none() {
        warn!(
            step_id = %step.step_id,
            "Tool output is not a JSON object, result mapping cannot be applied"
        );
    }

    for mapping in mappings {
        match output_map.as_ref().and_then(|m| m.get(&mapping.source_key)) {
            Some(value) => {
                updates.insert(mapping.target_key.clone(), value.clone());
            }
            None if mapping.required => {
                return Err(ExecutionError::MissingRequiredResult {
                    step_id: step.step_id.clone(),
                    key: mapping.source_key.clone(),
                });
            }
            None => {}
        }
    }

    Ok(updates)
}
