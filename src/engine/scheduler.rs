use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::engine::error::EngineError;
use crate::engine::executor::StepExecutor;
use crate::engine::transition::{Disposition, StepOutcome, Transition};
use crate::engine::types::{ControlSignal, StepResult, TaskStatus, parse_timestamp};
use crate::storage::{StoreError, TaskStore, TaskUpdate};
use crate::tools::ToolRegistry;

/// Timing knobs for the polling loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Sleep after a tick fails at the scheduler level.
    pub error_backoff: Duration,
    /// When set, the store is re-queried for new active tasks this often.
    pub rescan_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(25),
            rescan_interval: None,
        }
    }
}

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickSummary {
    pub processed: usize,
    pub dropped: Vec<String>,
}

/// The continuous runtime: a polling state machine over an agent's tracked tasks.
///
/// Task state is never cached between ticks. Every tick re-reads each task from
/// the store, applies control signals and wait timers, executes at most one
/// step and persists the outcome before moving on to the next task.
pub struct TaskScheduler {
    agent_name: String,
    store: TaskStore,
    executor: StepExecutor,
    config: SchedulerConfig,
    tracked: Vec<String>,
    last_rescan: Option<DateTime<Utc>>,
}

impl TaskScheduler {
    pub fn new(
        agent_name: impl Into<String>,
        store: TaskStore,
        registry: Arc<ToolRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            store,
            executor: StepExecutor::new(registry),
            config,
            tracked: Vec::new(),
            last_rescan: None,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Start tracking a task. Already-tracked ids are ignored.
    pub fn track(&mut self, task_id: impl Into<String>) {
        let task_id = task_id.into();
        if !self.is_tracked(&task_id) {
            self.tracked.push(task_id);
        }
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }

    pub fn is_tracked(&self, task_id: &str) -> bool {
        self.tracked.iter().any(|id| id == task_id)
    }

    /// Run one tick against the wall clock.
    pub async fn tick(&mut self) -> Result<TickSummary, EngineError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick as of `now`. Tasks are processed sequentially in tracking
    /// order; per-task failures never abort the tick.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickSummary, EngineError> {
        self.rescan_if_due(now).await?;

        let mut summary = TickSummary::default();
        let ids = self.tracked.clone();
        for task_id in &ids {
            summary.processed += 1;
            if self.process_task(task_id, now).await == Disposition::Drop {
                summary.dropped.push(task_id.clone());
            }
        }

        if !summary.dropped.is_empty() {
            self.tracked.retain(|id| !summary.dropped.contains(id));
            info!(
                agent = %self.agent_name,
                dropped = ?summary.dropped,
                remaining = self.tracked.len(),
                "Stopped tracking tasks"
            );
        }

        Ok(summary)
    }

    /// Poll until `shutdown` flips to true (or its sender goes away).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            agent = %self.agent_name,
            tracked = self.tracked.len(),
            interval = ?self.config.poll_interval,
            "Runtime started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.tick().await {
                Ok(summary) => {
                    debug!(
                        processed = summary.processed,
                        tracked = self.tracked.len(),
                        "Tick complete"
                    );
                    self.config.poll_interval
                }
                Err(e) => {
                    error!(
                        agent = %self.agent_name,
                        error = %e,
                        backoff = ?self.config.error_backoff,
                        "Scheduler tick failed"
                    );
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(agent = %self.agent_name, "Runtime stopped");
    }

    async fn rescan_if_due(&mut self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let Some(interval) = self.config.rescan_interval else {
            return Ok(());
        };
        let interval = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
        if let Some(last) = self.last_rescan
            && now.signed_duration_since(last) < interval
        {
            return Ok(());
        }

        self.last_rescan = Some(now);
        let ids = self
            .store
            .task_ids(&self.agent_name, &TaskStatus::ACTIVE)
            .await?;
        for id in ids {
            if !self.is_tracked(&id) {
                info!(task_id = %id, "Discovered new active task");
                self.tracked.push(id);
            }
        }
        Ok(())
    }

    /// Task-processing boundary. Store failures are logged, recorded on the
    /// task when possible, and the task is dropped.
    async fn process_task(&self, task_id: &str, now: DateTime<Utc>) -> Disposition {
        match self.advance(task_id, now).await {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Unexpected error while processing task");
                let update = TaskUpdate::failed(format!("Runtime error: {}", e));
                if let Err(record_err) = self.store.update_task(task_id, update).await {
                    error!(
                        task_id = %task_id,
                        error = %record_err,
                        "Failed to record runtime error on task"
                    );
                }
                Disposition::Drop
            }
        }
    }

    async fn advance(&self, task_id: &str, now: DateTime<Utc>) -> Result<Disposition, StoreError> {
        let Some(task) = self.store.fetch_task(task_id).await? else {
            info!(task_id = %task_id, "Task no longer exists");
            return Ok(Disposition::Drop);
        };

        match task.control_signal {
            ControlSignal::Stop => {
                info!(task_id = %task_id, "Stop signal received");
                let update = TaskUpdate::new()
                    .status(TaskStatus::Stopped)
                    .control_signal(ControlSignal::None);
                self.store.update_task(task_id, update).await?;
                return Ok(Disposition::Drop);
            }
            ControlSignal::Pause => {
                let mut update = TaskUpdate::new().control_signal(ControlSignal::None);
                if task.status != TaskStatus::Paused {
                    info!(task_id = %task_id, "Pause signal received");
                    update = update.status(TaskStatus::Paused);
                }
                self.store.update_task(task_id, update).await?;
                return Ok(Disposition::Keep);
            }
            ControlSignal::None => {}
        }

        let mut status = task.status;
        let mut woke = false;

        if status == TaskStatus::Waiting {
            let Some(raw) = task.wait_until.as_deref().filter(|s| !s.trim().is_empty()) else {
                return self
                    .fail(task_id, "Waiting status without wait_until timestamp.")
                    .await;
            };
            let Some(until) = parse_timestamp(raw) else {
                return self
                    .fail(task_id, format!("Invalid wait_until format: {}", raw))
                    .await;
            };
            if now < until {
                debug!(task_id = %task_id, until = %until, "Still waiting");
                return Ok(Disposition::Keep);
            }

            info!(task_id = %task_id, "Wait elapsed, resuming");
            let update = TaskUpdate::new()
                .status(TaskStatus::Running)
                .wait_until(None);
            self.store.update_task(task_id, update).await?;
            status = TaskStatus::Running;
            woke = true;
        }

        if status != TaskStatus::Running {
            if status.is_terminal() {
                return Ok(Disposition::Drop);
            }
            debug!(task_id = %task_id, status = %status, "Task not runnable this tick");
            return Ok(Disposition::Keep);
        }

        let Some(step_id) = task.current_step_id.clone() else {
            return self
                .fail(task_id, "Missing or invalid current_step_id reference.")
                .await;
        };

        let step = match self.store.fetch_step(&step_id).await {
            Ok(Some(step)) => step,
            Ok(None) => {
                return self
                    .fail(task_id, format!("Could not fetch step definition for {}.", step_id))
                    .await;
            }
            Err(StoreError::Decode { reason, .. }) => {
                return self
                    .fail(task_id, format!("Invalid step definition for {}: {}", step_id, reason))
                    .await;
            }
            Err(e) => return Err(e),
        };

        debug!(
            task_id = %task_id,
            step_id = %step.step_id,
            action = %step.action,
            "Executing step"
        );

        let result = if woke && step.is_wait() {
            Ok(StepResult::default())
        } else {
            self.executor.execute(&task, &step, now).await
        };

        let Transition { outcome, update } = Transition::resolve(&task, &step, result, now);
        match &outcome {
            StepOutcome::Advanced { next_step_id } => {
                debug!(task_id = %task_id, next = %next_step_id, "Step complete")
            }
            StepOutcome::Completed => info!(task_id = %task_id, "Task completed"),
            StepOutcome::Waiting { until } => {
                info!(task_id = %task_id, until = %until.to_rfc3339(), "Task waiting")
            }
            StepOutcome::Recovered { jump_to, error } => {
                warn!(
                    task_id = %task_id,
                    jump_to = %jump_to,
                    error = %error,
                    "Step failed, jumping to error handler"
                )
            }
            StepOutcome::Failed { error } => {
                error!(task_id = %task_id, error = %error, "Step failed")
            }
        }

        self.store.update_task(task_id, update).await?;
        Ok(outcome.disposition())
    }

    /// Record a fatal task error and drop the task.
    async fn fail(
        &self,
        task_id: &str,
        message: impl Into<String>,
    ) -> Result<Disposition, StoreError> {
        let message = message.into();
        error!(task_id = %task_id, error = %message, "Task failed");
        self.store
            .update_task(task_id, TaskUpdate::failed(message))
            .await?;
        Ok(Disposition::Drop)
    }
}
