use serde_json::{Value, json};

use sopflow::engine::types::*;

#[test]
fn task_status_round_trips_through_text() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Waiting,
        TaskStatus::Paused,
        TaskStatus::Stopped,
        TaskStatus::Completed,
        TaskStatus::Error,
    ] {
        assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
    }
    assert_eq!("WAITING".parse::<TaskStatus>().unwrap(), TaskStatus::Waiting);
    assert!("sleeping".parse::<TaskStatus>().is_err());

    assert!(TaskStatus::Completed.is_terminal());
    assert!(TaskStatus::Stopped.is_terminal());
    assert!(TaskStatus::Error.is_terminal());
    assert!(!TaskStatus::Paused.is_terminal());
}

#[test]
fn agent_task_decodes_leniently() {
    let task: AgentTask = serde_json::from_value(json!({
        "task_id": 42,
        "agent_name": null,
        "status": "running",
        "control_signal": null,
        "current_step_id": {"id": "s1", "title": "Start"},
        "current_environment": "{\"a\": 1}",
        "wait_until": null,
        "progress_details": null
    }))
    .unwrap();

    assert_eq!(task.task_id, "42");
    assert_eq!(task.agent_name, "");
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.control_signal, ControlSignal::None);
    assert_eq!(task.current_step_id.as_deref(), Some("s1"));
    assert_eq!(task.environment().get("a"), Some(&json!(1)));
    assert!(task.prior_result().is_none());
    assert_eq!(task.progress_details, "");
}

#[test]
fn agent_task_requires_id_and_status() {
    assert!(serde_json::from_value::<AgentTask>(json!({"status": "Running"})).is_err());
    assert!(serde_json::from_value::<AgentTask>(json!({"task_id": "t"})).is_err());
    assert!(
        serde_json::from_value::<AgentTask>(json!({"task_id": "t", "status": "Dreaming"}))
            .is_err()
    );
}

#[test]
fn environment_corruption_resets_to_empty() {
    for raw in [
        json!("[1, 2, 3]"),
        json!("{broken"),
        json!(17),
        json!(""),
        Value::Null,
    ] {
        assert!(decode_environment(&raw, "t1").is_empty(), "raw: {}", raw);
    }
    assert_eq!(
        decode_environment(&json!({"k": "v"}), "t1").get("k"),
        Some(&json!("v"))
    );
}

#[test]
fn reference_ids() {
    assert_eq!(reference_id(&json!("s1")), Some("s1".into()));
    assert_eq!(reference_id(&json!(" s2 ")), Some("s2".into()));
    assert_eq!(reference_id(&json!(7)), Some("7".into()));
    assert_eq!(reference_id(&json!({"id": "s3"})), Some("s3".into()));
    assert_eq!(reference_id(&json!({"name": "s3"})), None);
    assert_eq!(reference_id(&json!("")), None);
    assert_eq!(reference_id(&Value::Null), None);
}

#[test]
fn timestamps() {
    let utc = parse_timestamp("2025-03-01T12:00:00Z").unwrap();
    assert_eq!(parse_timestamp("2025-03-01T13:00:00+01:00"), Some(utc));
    assert_eq!(parse_timestamp("2025-03-01T12:00:00"), Some(utc));
    assert_eq!(parse_timestamp("2025-03-01 12:00:00.000"), Some(utc));
    assert!(parse_timestamp("yesterday").is_none());
}

#[test]
fn bindings_from_descriptors() {
    assert_eq!(
        Binding::from_param(&json!({"value": 3})).unwrap(),
        Binding::Literal(json!(3))
    );
    assert_eq!(
        Binding::from_param(&json!({"source": "environment", "key": "k"})).unwrap(),
        Binding::Environment("k".into())
    );
    assert_eq!(
        Binding::from_param(&json!({"source": "prior_step_result", "key": "k"})).unwrap(),
        Binding::PriorStepResult("k".into())
    );
    assert!(Binding::from_param(&json!("bare")).is_err());
    assert!(Binding::from_param(&json!({"source": "environment"})).is_err());
    assert!(Binding::from_param(&json!({})).is_err());

    assert_eq!(Binding::from_update(&Value::Null).unwrap(), Binding::Null);
    assert_eq!(
        Binding::from_update(&json!("plain")).unwrap(),
        Binding::Literal(json!("plain"))
    );
}

#[test]
fn binding_resolution_defaults_to_null() {
    let mut env = Environment::new();
    env.insert("present".into(), json!("yes"));
    let prior = json!({"score": 9}).as_object().cloned();

    assert_eq!(
        Binding::Environment("present".into()).resolve(&env, prior.as_ref()),
        json!("yes")
    );
    assert_eq!(
        Binding::Environment("absent".into()).resolve(&env, prior.as_ref()),
        Value::Null
    );
    assert_eq!(
        Binding::PriorStepResult("score".into()).resolve(&env, prior.as_ref()),
        json!(9)
    );
    assert_eq!(
        Binding::PriorStepResult("score".into()).resolve(&env, None),
        Value::Null
    );
}

#[test]
fn result_mapping_entries_without_keys_are_skipped() {
    let step: SopStep = serde_json::from_value(json!({
        "step_id": "s",
        "action": "call_tool",
        "tool_name": "t",
        "result_mapping": "[{\"source_key\": \"a\", \"target_key\": \"b\"}, {\"source_key\": \"\"}, 5]"
    }))
    .unwrap();

    match step.decode_action().unwrap() {
        StepAction::CallTool { result_mapping, .. } => {
            assert_eq!(
                result_mapping,
                vec![ResultMapping {
                    source_key: "a".into(),
                    target_key: "b".into(),
                    required: false,
                }]
            );
        }
        other => panic!("unexpected action: {:?}", other),
    }
}
