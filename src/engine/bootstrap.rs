use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::engine::error::EngineError;
use crate::engine::scheduler::{SchedulerConfig, TaskScheduler};
use crate::engine::types::{SopStep, StepAction, TaskStatus};
use crate::storage::{StoreError, TaskStore};
use crate::tools::ToolRegistry;

/// Tools an agent cannot start without unless configured otherwise.
pub const DEFAULT_REQUIRED_TOOLS: [&str; 2] = ["retrieve_records", "update_records"];

/// Prepares a [`TaskScheduler`]: checks the tool baseline, then seeds the
/// tracked set from the store so a restart resumes where persisted state left off.
pub struct Bootstrapper {
    agent_name: String,
    store: TaskStore,
    registry: Arc<ToolRegistry>,
    required_tools: Vec<String>,
}

impl Bootstrapper {
    pub fn new(
        agent_name: impl Into<String>,
        store: TaskStore,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            store,
            registry,
            required_tools: DEFAULT_REQUIRED_TOOLS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_required_tools(mut self, tools: Vec<String>) -> Self {
        self.required_tools = tools;
        self
    }

    /// Fail when any baseline tool is absent from the registry snapshot.
    pub fn validate_tools(&self) -> Result<(), EngineError> {
        let missing = self.registry.missing(&self.required_tools);
        if missing.is_empty() {
            return Ok(());
        }
        Err(EngineError::MissingTools {
            agent: self.agent_name.clone(),
            missing: missing.into_iter().map(str::to_string).collect(),
        })
    }

    /// Ids of this agent's tasks that are still active.
    pub async fn discover(&self) -> Result<Vec<String>, StoreError> {
        self.store
            .task_ids(&self.agent_name, &TaskStatus::ACTIVE)
            .await
    }

    /// Validate, discover and audit, returning a scheduler ready to [`run`](TaskScheduler::run).
    ///
    /// A discovery failure is logged and the scheduler starts empty; only a
    /// missing baseline tool is fatal.
    pub async fn bootstrap(self, config: SchedulerConfig) -> Result<TaskScheduler, EngineError> {
        self.validate_tools()?;

        let task_ids = match self.discover().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(agent = %self.agent_name, error = %e, "Failed to load active tasks");
                Vec::new()
            }
        };
        info!(agent = %self.agent_name, count = task_ids.len(), "Loaded active tasks");

        self.audit(&task_ids).await;

        let mut scheduler =
            TaskScheduler::new(self.agent_name, self.store, self.registry, config);
        for id in task_ids {
            scheduler.track(id);
        }
        Ok(scheduler)
    }

    async fn audit(&self, task_ids: &[String]) {
        let mut starts = Vec::new();
        for id in task_ids {
            match self.store.fetch_task(id).await {
                Ok(Some(task)) => starts.extend(task.current_step_id),
                Ok(None) => {}
                Err(e) => warn!(task_id = %id, error = %e, "Could not read task for SOP audit"),
            }
        }
        if starts.is_empty() {
            return;
        }

        let report = match audit_sop(&self.store, &self.registry, &starts).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "SOP audit failed");
                return;
            }
        };

        for (step_id, tool) in &report.unknown_tools {
            warn!(
                step_id = %step_id,
                tool = %tool,
                "Step references a tool that is not registered"
            );
        }
        for step_id in &report.missing_steps {
            warn!(step_id = %step_id, "Referenced step does not exist");
        }
        for (step_id, reason) in &report.invalid_steps {
            warn!(step_id = %step_id, reason = %reason, "Step definition is invalid");
        }
        if !report.cycles.is_empty() {
            info!(steps = ?report.cycles, "SOP contains cycles");
        }
        info!(steps = report.visited.len(), "SOP audit complete");
    }
}

/// Findings from walking an SOP graph.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SopAudit {
    /// Reachable steps, in discovery order.
    pub visited: Vec<String>,
    pub missing_steps: Vec<String>,
    /// `(step_id, tool_name)` pairs for tools absent from the registry.
    pub unknown_tools: Vec<(String, String)>,
    pub invalid_steps: Vec<(String, String)>,
    /// Steps whose outgoing reference closes a cycle.
    pub cycles: Vec<String>,
}

impl SopAudit {
    /// Cycles are legal, so they do not make a report unclean.
    pub fn is_clean(&self) -> bool {
        self.missing_steps.is_empty()
            && self.unknown_tools.is_empty()
            && self.invalid_steps.is_empty()
    }
}

/// Walk every step reachable from `starts` through `next_step_id` and
/// `error_handling_step_id`.
pub async fn audit_sop(
    store: &TaskStore,
    registry: &ToolRegistry,
    starts: &[String],
) -> Result<SopAudit, StoreError> {
    let mut report = SopAudit::default();
    let mut steps: BTreeMap<String, SopStep> = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = starts.iter().cloned().collect();

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let step = match store.fetch_step(&id).await {
            Ok(Some(step)) => step,
            Ok(None) => {
                report.missing_steps.push(id);
                continue;
            }
            Err(StoreError::Decode { reason, .. }) => {
                report.invalid_steps.push((id, reason));
                continue;
            }
            Err(e) => return Err(e),
        };

        report.visited.push(id.clone());
        match step.decode_action() {
            Ok(StepAction::CallTool { tool_name, .. }) if !registry.contains(&tool_name) => {
                report.unknown_tools.push((id.clone(), tool_name));
            }
            Ok(_) => {}
            Err(e) => report.invalid_steps.push((id.clone(), e.to_string())),
        }

        queue.extend(successors(&step));
        steps.insert(id, step);
    }

    report.cycles = find_cycles(&steps, starts);
    Ok(report)
}

fn successors(step: &SopStep) -> impl Iterator<Item = String> + '_ {
    step.next_step_id
        .iter()
        .chain(step.error_handling_step_id.iter())
        .cloned()
}

/// Depth-first search for back edges. Returns the steps that close a cycle.
fn find_cycles(steps: &BTreeMap<String, SopStep>, starts: &[String]) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut closing: Vec<String> = Vec::new();

    for start in starts {
        if marks.contains_key(start.as_str()) || !steps.contains_key(start) {
            continue;
        }
        // (step, successors left to visit)
        let mut stack: Vec<(&str, Vec<String>)> = Vec::new();
        if let Some((id, step)) = steps.get_key_value(start) {
            marks.insert(id.as_str(), Mark::Open);
            stack.push((id.as_str(), successors(step).collect()));
        }

        while let Some((id, pending)) = stack.last_mut() {
            let current = *id;
            let Some(next) = pending.pop() else {
                marks.insert(current, Mark::Done);
                stack.pop();
                continue;
            };
            match marks.get(next.as_str()) {
                Some(Mark::Open) => {
                    if !closing.iter().any(|c| c == current) {
                        closing.push(current.to_string());
                    }
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some((next_id, step)) = steps.get_key_value(&next) {
                        marks.insert(next_id.as_str(), Mark::Open);
                        stack.push((next_id.as_str(), successors(step).collect()));
                    }
                }
            }
        }
    }

    closing
}
