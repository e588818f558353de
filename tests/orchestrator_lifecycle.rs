// tests/orchestrator_lifecycle.rs

use std::error::Error;
use std::time::Duration;

use serde_json::json;

use agentvisor::coord::RuleTable;
use agentvisor::engine::SettingsUpdate;
use agentvisor::errors::OrchestratorError;
use agentvisor::notify::OrchestratorEvent;
use agentvisor::types::{InstanceId, InstanceStatus, Settings};
use agentvisor_test_utils::{init_tracing, FakeUnit, Harness, Outcome};

type TestResult = Result<(), Box<dyn Error>>;

fn settings(value: serde_json::Value) -> Settings {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("settings must be a JSON object"),
    }
}

#[tokio::test]
async fn report_run_completes_and_emits_payload() -> TestResult {
    init_tracing();

    let report = FakeUnit::succeeding_with(json!({ "summary": "3 meetings" }));
    let mut h = Harness::new(RuleTable::default(), &[("report", &report)]);

    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    let result = h.orchestrator.run(id, Settings::new()).await?;

    assert!(result.success);
    assert_eq!(result.payload, json!({ "summary": "3 meetings" }));

    let status = h.orchestrator.get_status(id)?;
    assert_eq!(status.status, InstanceStatus::Idle);
    assert!(status.last_run.is_some());
    assert_eq!(h.orchestrator.get_performance(id)?.total_runs, 1);

    let events = h.drain_events();
    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::RunCompleted { instance_id, result } => Some((*instance_id, result)),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].0, id);
    assert_eq!(completed[0].1.payload, json!({ "summary": "3 meetings" }));

    assert_eq!(events.first().map(|e| e.name()), Some("instance-created"));
    Ok(())
}

#[tokio::test]
async fn status_transitions_are_published_in_order() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    let mut h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    h.orchestrator.run(id, Settings::new()).await?;

    let transitions: Vec<(InstanceStatus, InstanceStatus)> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            OrchestratorEvent::StatusChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (InstanceStatus::Idle, InstanceStatus::Running),
            (InstanceStatus::Running, InstanceStatus::Idle),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unit_receives_merged_config_and_params() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    let (sink, _rx) = agentvisor::notify::ChannelSink::new();
    let mut orchestrator = agentvisor::engine::Orchestrator::new(
        RuleTable::default(),
        std::sync::Arc::new(agentvisor::store::MemoryInstanceStore::new()),
        std::sync::Arc::new(sink),
    );
    orchestrator.register(
        "digest",
        unit.as_unit(),
        settings(json!({ "lang": "en", "limit": 10 })),
    )?;

    let id = orchestrator.create_instance("u1", "digest", settings(json!({ "limit": 3 })))?;
    orchestrator
        .run(id, settings(json!({ "reason": "manual" })))
        .await?;

    let calls = unit.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_id, "u1");
    assert_eq!(calls[0].unit_type, "digest");
    assert_eq!(calls[0].config, settings(json!({ "lang": "en", "limit": 3 })));
    assert_eq!(calls[0].params, settings(json!({ "reason": "manual" })));
    Ok(())
}

#[tokio::test]
async fn failed_run_leaves_error_until_resume_or_success() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    unit.push_outcome(Outcome::Fail("upstream timeout".to_string()));
    let mut h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;

    let err = h.orchestrator.run(id, Settings::new()).await.unwrap_err();
    match err {
        OrchestratorError::ExecutionFailed { instance_id, source } => {
            assert_eq!(instance_id, id);
            assert!(source.to_string().contains("upstream timeout"));
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
    let status = h.orchestrator.get_status(id)?;
    assert_eq!(status.status, InstanceStatus::Error);
    assert!(status.last_run.is_none());

    assert!(h.drain_events().iter().any(|e| matches!(
        e,
        OrchestratorEvent::RunFailed { error, .. } if error.contains("upstream timeout")
    )));

    // An errored instance may be run again explicitly.
    h.orchestrator.run(id, Settings::new()).await?;
    assert_eq!(h.orchestrator.get_status(id)?.status, InstanceStatus::Idle);

    unit.push_outcome(Outcome::Fail("again".to_string()));
    assert!(h.orchestrator.run(id, Settings::new()).await.is_err());
    h.orchestrator.resume(id)?;
    assert_eq!(h.orchestrator.get_status(id)?.status, InstanceStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn pause_is_idempotent_and_blocks_runs() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    let mut h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    h.drain_events();

    h.orchestrator.pause(id)?;
    h.orchestrator.pause(id)?;
    assert_eq!(h.orchestrator.get_status(id)?.status, InstanceStatus::Paused);

    let changes = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, OrchestratorEvent::StatusChanged { .. }))
        .count();
    assert_eq!(changes, 1, "second pause must not publish a transition");

    let err = h.orchestrator.run(id, Settings::new()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InstancePaused(i) if i == id));
    assert_eq!(unit.calls(), 0);

    h.orchestrator.resume(id)?;
    h.orchestrator.run(id, Settings::new()).await?;
    assert_eq!(unit.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn resume_on_idle_is_a_noop() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    let mut h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    h.drain_events();

    h.orchestrator.resume(id)?;
    assert_eq!(h.orchestrator.get_status(id)?.status, InstanceStatus::Idle);
    assert!(h.drain_events().is_empty());
    Ok(())
}

#[test]
fn create_rejects_unknown_unit_and_duplicates() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);

    let err = h
        .orchestrator
        .create_instance("u1", "nope", Settings::new())
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownUnitType(ref t) if t == "nope"));

    let first = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    let err = h
        .orchestrator
        .create_instance("u1", "report", Settings::new())
        .unwrap_err();
    match err {
        OrchestratorError::AlreadyExists { existing, .. } => assert_eq!(existing, first),
        other => panic!("expected AlreadyExists, got {other:?}"),
    }

    // A different user gets their own instance.
    let second = h.orchestrator.create_instance("u2", "report", Settings::new())?;
    assert_ne!(first, second);
    assert_eq!(h.orchestrator.get_orchestrator_status().total_instances, 2);
    Ok(())
}

#[test]
fn register_rejects_duplicate_unit_type() {
    init_tracing();

    let unit = FakeUnit::new();
    let mut h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let err = h
        .orchestrator
        .register("report", unit.as_unit(), Settings::new())
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateUnitType(ref t) if t == "report"));
}

#[tokio::test]
async fn unknown_instance_is_reported_everywhere() {
    init_tracing();

    let unit = FakeUnit::new();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let ghost = InstanceId::new();

    assert!(matches!(
        h.orchestrator.run(ghost, Settings::new()).await,
        Err(OrchestratorError::InstanceNotFound(_))
    ));
    assert!(matches!(h.orchestrator.pause(ghost), Err(OrchestratorError::InstanceNotFound(_))));
    assert!(matches!(h.orchestrator.resume(ghost), Err(OrchestratorError::InstanceNotFound(_))));
    assert!(matches!(h.orchestrator.get_status(ghost), Err(OrchestratorError::InstanceNotFound(_))));
    assert!(matches!(
        h.orchestrator.get_performance(ghost),
        Err(OrchestratorError::InstanceNotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.remove_instance(ghost),
        Err(OrchestratorError::InstanceNotFound(_))
    ));
}

#[test]
fn update_settings_changes_schedule_but_not_status() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    h.orchestrator.pause(id)?;

    let snapshot = h.orchestrator.update_settings(
        id,
        SettingsUpdate::new()
            .settings(settings(json!({ "tz": "UTC" })))
            .auto_run(true)
            .auto_run_interval(Duration::from_secs(600)),
    )?;
    assert_eq!(snapshot.status, InstanceStatus::Paused);
    assert_eq!(snapshot.settings, settings(json!({ "tz": "UTC" })));

    let status = h.orchestrator.get_status(id)?;
    assert!(status.auto_run_enabled);
    assert_eq!(status.auto_run_interval, Duration::from_secs(600));

    // Fields left as None are untouched.
    h.orchestrator
        .update_settings(id, SettingsUpdate::new().auto_run(false))?;
    let status = h.orchestrator.get_status(id)?;
    assert!(!status.auto_run_enabled);
    assert_eq!(status.auto_run_interval, Duration::from_secs(600));
    Ok(())
}

#[test]
fn orchestrator_status_and_listing() -> TestResult {
    init_tracing();

    let a = FakeUnit::new();
    let b = FakeUnit::new();
    let mut h = Harness::new(RuleTable::default(), &[("meeting", &a), ("email", &b)]);

    h.orchestrator.create_instance("u1", "meeting", Settings::new())?;
    h.orchestrator.create_instance("u1", "email", Settings::new())?;
    let other = h.orchestrator.create_instance("u2", "email", Settings::new())?;

    let status = h.orchestrator.get_orchestrator_status();
    assert_eq!(status.total_unit_types, 2);
    assert_eq!(status.total_instances, 3);
    assert_eq!(status.running_count, 0);

    let units: Vec<String> = h
        .orchestrator
        .list_instances("u1")
        .into_iter()
        .map(|s| s.unit_type)
        .collect();
    assert_eq!(units, vec!["email".to_string(), "meeting".to_string()]);

    h.drain_events();
    h.orchestrator.remove_instance(other)?;
    assert!(h.orchestrator.list_instances("u2").is_empty());
    assert!(h.store.get("u2", "email").is_none());
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::InstanceRemoved { instance_id, .. } if *instance_id == other)));

    // The slot can be reused by a fresh instance.
    let again = h.orchestrator.create_instance("u2", "email", Settings::new())?;
    assert_ne!(again, other);
    Ok(())
}
