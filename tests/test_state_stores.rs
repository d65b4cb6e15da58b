//! Tests for RecordStore implementations and the typed TaskStore on top of them.

use std::sync::Arc;

use serde_json::{Value, json};

use sopflow::engine::types::*;
use sopflow::storage::json_store::JsonRecordStore;
use sopflow::storage::memory_store::MemoryRecordStore;
use sopflow::storage::sql_store::SqlRecordStore;
use sopflow::storage::{Filter, Record, RecordStore, StoreError, Table, TaskStore, TaskUpdate};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

/// Behaviour every backend must share.
async fn check_record_store(store: Arc<dyn RecordStore>) {
    // Missing records
    assert!(store.fetch_record(Table::AgentTasks, "nope").await.unwrap().is_none());
    let err = store
        .update_fields(Table::AgentTasks, "nope", record(json!({"status": "Running"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    // Insert and fetch
    for (id, agent, status) in [
        ("t2", "scout", "Running"),
        ("t1", "scout", "Waiting"),
        ("t3", "other", "Running"),
        ("t4", "scout", "Completed"),
    ] {
        let inserted = store
            .insert_record(
                Table::AgentTasks,
                record(json!({"task_id": id, "agent_name": agent, "status": status})),
            )
            .await
            .unwrap();
        assert_eq!(inserted, id);
    }
    let t1 = store.fetch_record(Table::AgentTasks, "t1").await.unwrap().unwrap();
    assert_eq!(t1["status"], json!("Waiting"));

    // Tables are separate
    assert!(store.fetch_record(Table::SopSteps, "t1").await.unwrap().is_none());

    // Filtered, ordered by id
    let filter = Filter::new()
        .eq("agent_name", "scout")
        .any_of("status", ["Running", "Waiting"]);
    let ids: Vec<String> = store
        .fetch_filtered(Table::AgentTasks, &filter)
        .await
        .unwrap()
        .iter()
        .filter_map(|r| Table::AgentTasks.record_id(r))
        .collect();
    assert_eq!(ids, vec!["t1", "t2"]);

    // Merge update keeps untouched fields
    store
        .update_fields(
            Table::AgentTasks,
            "t1",
            record(json!({"status": "Running", "wait_until": null})),
        )
        .await
        .unwrap();
    let t1 = store.fetch_record(Table::AgentTasks, "t1").await.unwrap().unwrap();
    assert_eq!(t1["status"], json!("Running"));
    assert_eq!(t1["agent_name"], json!("scout"));
    assert_eq!(t1["wait_until"], Value::Null);

    // Insert replaces
    store
        .insert_record(Table::AgentTasks, record(json!({"task_id": "t1", "status": "Error"})))
        .await
        .unwrap();
    let t1 = store.fetch_record(Table::AgentTasks, "t1").await.unwrap().unwrap();
    assert!(t1.get("agent_name").is_none());

    // Records need their primary key
    let err = store
        .insert_record(Table::SopSteps, record(json!({"action": "wait"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingKey { field: "step_id", .. }));
}

/// TaskStore encoding through a backend.
async fn check_task_store(records: Arc<dyn RecordStore>) {
    let store = TaskStore::new(records.clone());
    let mut env = Environment::new();
    env.insert("city".into(), json!("Oslo"));

    store
        .create_task("t1", "scout", TaskStatus::Pending, Some("s1"), &env)
        .await
        .unwrap();

    // Map fields are stored as JSON text
    let raw = records.fetch_record(Table::AgentTasks, "t1").await.unwrap().unwrap();
    assert_eq!(raw["current_environment"], json!("{\"city\":\"Oslo\"}"));
    assert_eq!(raw["control_signal"], json!("None"));

    let until = chrono::DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let mut env2 = env.clone();
    env2.insert("temp".into(), json!(4));
    store
        .update_task(
            "t1",
            TaskUpdate::new()
                .status(TaskStatus::Waiting)
                .environment(env2.clone())
                .last_result(Some(json!({"temp": 4})))
                .wait_until(Some(until))
                .error_message(None),
        )
        .await
        .unwrap();

    let task = store.fetch_task("t1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Waiting);
    assert_eq!(task.current_step_id.as_deref(), Some("s1"));
    assert_eq!(task.environment(), env2);
    assert_eq!(task.prior_result(), Some(json!({"temp": 4})));
    assert_eq!(task.wait_until.as_deref().and_then(parse_timestamp), Some(until));
    assert!(task.error_message.is_none());
    assert!(task.last_updated.is_some());

    assert_eq!(
        store.task_ids("scout", &TaskStatus::ACTIVE).await.unwrap(),
        vec!["t1"]
    );
    assert!(store.task_ids("other", &TaskStatus::ACTIVE).await.unwrap().is_empty());
    assert_eq!(
        store
            .list_tasks(Some("scout"), Some(TaskStatus::Waiting))
            .await
            .unwrap()
            .len(),
        1
    );

    // Steps
    let id = store
        .put_step(record(json!({
            "step_id": "s1",
            "action": "call_tool",
            "tool_name": "get_weather",
            "tool_params": {"city": {"source": "environment", "key": "city"}},
            "result_mapping": [{"source_key": "w", "target_key": "weather"}],
            "next_step_id": {"id": "s2"}
        })))
        .await
        .unwrap();
    assert_eq!(id, "s1");

    let raw = records.fetch_record(Table::SopSteps, "s1").await.unwrap().unwrap();
    assert!(raw["tool_params"].is_string());
    assert!(raw["result_mapping"].is_string());

    let step = store.fetch_step("s1").await.unwrap().unwrap();
    assert_eq!(step.next_step_id.as_deref(), Some("s2"));
    match step.decode_action().unwrap() {
        StepAction::CallTool {
            tool_name,
            params,
            result_mapping,
        } => {
            assert_eq!(tool_name, "get_weather");
            assert_eq!(
                params,
                vec![("city".to_string(), Binding::Environment("city".into()))]
            );
            assert_eq!(result_mapping.len(), 1);
        }
        other => panic!("unexpected action: {:?}", other),
    }
    assert!(store.fetch_step("s2").await.unwrap().is_none());
}

// ===== MemoryRecordStore =====

#[tokio::test]
async fn memory_store_contract() {
    check_record_store(Arc::new(MemoryRecordStore::new())).await;
}

#[tokio::test]
async fn memory_task_store() {
    check_task_store(Arc::new(MemoryRecordStore::new())).await;
}

// ===== JsonRecordStore =====

#[tokio::test]
async fn json_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    check_record_store(Arc::new(JsonRecordStore::new(dir.path()))).await;
}

#[tokio::test]
async fn json_task_store() {
    let dir = tempfile::tempdir().unwrap();
    check_task_store(Arc::new(JsonRecordStore::new(dir.path()))).await;
}

#[tokio::test]
async fn json_store_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonRecordStore::new(dir.path());
    store
        .insert_record(
            Table::SopSteps,
            record(json!({"step_id": "greet", "action": "log_message"})),
        )
        .await
        .unwrap();

    let path = dir.path().join("SOP_Steps").join("greet.json");
    assert!(path.exists());
    let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(on_disk["action"], json!("log_message"));
}

#[tokio::test]
async fn json_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = TaskStore::new(Arc::new(JsonRecordStore::new(dir.path())));
        store
            .create_task("t1", "scout", TaskStatus::Running, Some("s1"), &Environment::new())
            .await
            .unwrap();
    }

    let store = TaskStore::new(Arc::new(JsonRecordStore::new(dir.path())));
    let task = store.fetch_task("t1").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
}

#[tokio::test]
async fn json_store_rejects_path_like_ids() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonRecordStore::new(dir.path());

    assert!(store.fetch_record(Table::AgentTasks, "../etc/passwd").await.unwrap().is_none());
    let err = store
        .insert_record(Table::AgentTasks, record(json!({"task_id": "../escape"})))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidId(_)));
}

#[tokio::test]
async fn json_store_skips_corrupt_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonRecordStore::new(dir.path());
    store
        .insert_record(Table::AgentTasks, record(json!({"task_id": "ok", "agent_name": "scout"})))
        .await
        .unwrap();
    std::fs::write(dir.path().join("AgentTasks").join("broken.json"), "{oops").unwrap();

    let all = store
        .fetch_filtered(Table::AgentTasks, &Filter::new())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
}

// ===== SqlRecordStore =====

async fn sqlite_store(dir: &tempfile::TempDir) -> SqlRecordStore {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("sopflow.db").display());
    SqlRecordStore::connect(&url).await.unwrap()
}

#[tokio::test]
async fn sql_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    check_record_store(Arc::new(sqlite_store(&dir).await)).await;
}

#[tokio::test]
async fn sql_task_store() {
    let dir = tempfile::tempdir().unwrap();
    check_task_store(Arc::new(sqlite_store(&dir).await)).await;
}

#[tokio::test]
async fn sql_store_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = sqlite_store(&dir).await;
        store
            .insert_record(Table::AgentTasks, record(json!({"task_id": "t1", "status": "Paused"})))
            .await
            .unwrap();
    }

    let store = sqlite_store(&dir).await;
    let t1 = store.fetch_record(Table::AgentTasks, "t1").await.unwrap().unwrap();
    assert_eq!(t1["status"], json!("Paused"));
}
