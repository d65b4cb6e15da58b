use std::sync::Arc;

use serde_json::{Value, json};

use sopflow::engine::types::{Environment, TaskStatus};
use sopflow::engine::{Bootstrapper, EngineError, SchedulerConfig, audit_sop};
use sopflow::storage::memory_store::MemoryRecordStore;
use sopflow::storage::{TaskStore, TaskUpdate};
use sopflow::tools::ToolRegistry;

fn store() -> TaskStore {
    TaskStore::new(Arc::new(MemoryRecordStore::new()))
}

async fn add_step(store: &TaskStore, step: Value) {
    let Value::Object(record) = step else {
        panic!("step must be an object")
    };
    store.put_step(record).await.unwrap();
}

#[tokio::test]
async fn bootstrap_tracks_active_tasks_of_this_agent() {
    let store = store();
    let empty = Environment::new();
    for (id, agent, status) in [
        ("a-running", "scout", TaskStatus::Running),
        ("b-waiting", "scout", TaskStatus::Waiting),
        ("c-paused", "scout", TaskStatus::Paused),
        ("d-pending", "scout", TaskStatus::Pending),
        ("e-done", "scout", TaskStatus::Completed),
        ("f-error", "scout", TaskStatus::Error),
        ("g-stopped", "scout", TaskStatus::Stopped),
        ("h-foreign", "other", TaskStatus::Running),
    ] {
        store
            .create_task(id, agent, TaskStatus::Pending, Some("s1"), &empty)
            .await
            .unwrap();
        store
            .update_task(id, TaskUpdate::new().status(status))
            .await
            .unwrap();
    }

    let registry = Arc::new(ToolRegistry::with_store(store.records()));
    let scheduler = Bootstrapper::new("scout", store, registry)
        .bootstrap(SchedulerConfig::default())
        .await
        .unwrap();

    assert_eq!(
        scheduler.tracked(),
        &["a-running", "b-waiting", "c-paused", "d-pending"]
    );
    assert_eq!(scheduler.agent_name(), "scout");
}

#[tokio::test]
async fn bootstrap_fails_without_baseline_tools() {
    let store = store();
    let registry = Arc::new(ToolRegistry::with_builtins());

    let err = Bootstrapper::new("scout", store, registry)
        .bootstrap(SchedulerConfig::default())
        .await
        .err()
        .expect("bootstrap should fail");

    match err {
        EngineError::MissingTools { agent, missing } => {
            assert_eq!(agent, "scout");
            assert_eq!(missing, vec!["retrieve_records", "update_records"]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn custom_baseline_is_checked() {
    let store = store();
    let registry = Arc::new(ToolRegistry::with_builtins());

    let ok = Bootstrapper::new("scout", store.clone(), registry.clone())
        .with_required_tools(vec!["get_weather".into(), "hash".into()]);
    assert!(ok.validate_tools().is_ok());

    let missing = Bootstrapper::new("scout", store, registry)
        .with_required_tools(vec!["get_weather".into(), "send_sms".into()]);
    let err = missing.validate_tools().unwrap_err();
    assert!(err.to_string().contains("send_sms"));
}

#[tokio::test]
async fn audit_reports_problems_and_cycles() {
    let store = store();
    add_step(
        &store,
        json!({"step_id": "start", "action": "call_tool", "tool_name": "get_weather",
               "next_step_id": "forecast", "error_handling_step_id": "retry"}),
    )
    .await;
    add_step(
        &store,
        json!({"step_id": "retry", "action": "wait", "duration_seconds": 30, "next_step_id": "start"}),
    )
    .await;
    add_step(
        &store,
        json!({"step_id": "forecast", "action": "call_tool", "tool_name": "crystal_ball",
               "next_step_id": "report"}),
    )
    .await;
    add_step(
        &store,
        json!({"step_id": "report", "action": "shout", "next_step_id": "nowhere"}),
    )
    .await;

    let registry = ToolRegistry::with_builtins();
    let report = audit_sop(&store, &registry, &["start".to_string()])
        .await
        .unwrap();

    assert_eq!(report.visited, vec!["start", "forecast", "retry", "report"]);
    assert_eq!(report.missing_steps, vec!["nowhere"]);
    assert_eq!(
        report.unknown_tools,
        vec![("forecast".to_string(), "crystal_ball".to_string())]
    );
    assert_eq!(report.invalid_steps.len(), 1);
    assert_eq!(report.invalid_steps[0].0, "report");
    assert_eq!(report.cycles, vec!["retry"]);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn audit_of_linear_sop_is_clean() {
    let store = store();
    add_step(
        &store,
        json!({"step_id": "one", "action": "log_message", "message_template": "hi", "next_step_id": "two"}),
    )
    .await;
    add_step(
        &store,
        json!({"step_id": "two", "action": "update_environment", "environment_updates": {"done": true}}),
    )
    .await;

    let report = audit_sop(&store, &ToolRegistry::new(), &["one".to_string()])
        .await
        .unwrap();

    assert!(report.is_clean());
    assert!(report.cycles.is_empty());
    assert_eq!(report.visited, vec!["one", "two"]);
}
