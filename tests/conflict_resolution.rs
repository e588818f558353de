// tests/conflict_resolution.rs

use std::error::Error;
use std::sync::Arc;

use agentvisor::coord::{CoordinationRule, RuleTable};
use agentvisor::engine::Orchestrator;
use agentvisor::errors::OrchestratorError;
use agentvisor::notify::OrchestratorEvent;
use agentvisor::types::{InstanceId, InstanceStatus, Settings};
use agentvisor_test_utils::{init_tracing, with_timeout, FakeUnit, Gate, Harness, Outcome};

type TestResult = Result<(), Box<dyn Error>>;

fn meeting_router_rules(symmetric: bool, meeting_declares: bool, router_declares: bool) -> RuleTable {
    let mut meeting = CoordinationRule::new();
    if meeting_declares {
        meeting = meeting.conflicts_with("router");
    }
    let mut router = CoordinationRule::new();
    if router_declares {
        router = router.conflicts_with("meeting");
    }
    RuleTable::builder()
        .symmetric_conflicts(symmetric)
        .rule("meeting", meeting)
        .rule("router", router)
        .build()
}

struct Setup {
    orchestrator: Arc<Orchestrator>,
    meeting_unit: FakeUnit,
    gate: Gate,
    meeting: InstanceId,
    router: InstanceId,
    events: tokio::sync::mpsc::UnboundedReceiver<OrchestratorEvent>,
}

fn setup(rules: RuleTable, router_user: &str) -> Result<Setup, Box<dyn Error>> {
    let (meeting_unit, gate) = FakeUnit::gated();
    let router_unit = FakeUnit::new();
    let Harness {
        orchestrator,
        events,
        ..
    } = Harness::new(rules, &[("meeting", &meeting_unit), ("router", &router_unit)]);

    let meeting = orchestrator.create_instance("u1", "meeting", Settings::new())?;
    let router = orchestrator.create_instance(router_user, "router", Settings::new())?;
    Ok(Setup {
        orchestrator: Arc::new(orchestrator),
        meeting_unit,
        gate,
        meeting,
        router,
        events,
    })
}

/// Start the gated meeting run and wait until the unit is executing.
async fn start_meeting(
    s: &Setup,
) -> tokio::task::JoinHandle<agentvisor::errors::Result<agentvisor::exec::ExecutionResult>> {
    let orch = Arc::clone(&s.orchestrator);
    let id = s.meeting;
    let handle = tokio::spawn(async move { orch.run(id, Settings::new()).await });
    with_timeout(s.meeting_unit.wait_started()).await;
    handle
}

#[tokio::test]
async fn running_router_pauses_running_meeting() -> TestResult {
    init_tracing();

    let mut s = setup(meeting_router_rules(true, true, true), "u1")?;
    let meeting_run = start_meeting(&s).await;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Running);

    let router_result = s.orchestrator.run(s.router, Settings::new()).await?;
    assert!(router_result.success);

    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Paused);
    assert_eq!(s.orchestrator.get_status(s.router)?.status, InstanceStatus::Idle);

    // Pausing does not interrupt the in-flight meeting run; it completes and
    // the instance stays paused.
    s.gate.open();
    let meeting_result = with_timeout(meeting_run).await??;
    assert!(meeting_result.success);
    let meeting = s.orchestrator.get_status(s.meeting)?;
    assert_eq!(meeting.status, InstanceStatus::Paused);
    assert!(meeting.last_run.is_some());

    let mut paused_events = 0;
    while let Ok(ev) = s.events.try_recv() {
        if let OrchestratorEvent::StatusChanged { instance_id, to: InstanceStatus::Paused, from } = ev {
            assert_eq!(instance_id, s.meeting);
            assert_eq!(from, InstanceStatus::Running);
            paused_events += 1;
        }
    }
    assert_eq!(paused_events, 1);
    Ok(())
}

#[tokio::test]
async fn resumed_meeting_records_the_outcome_of_its_in_flight_run() -> TestResult {
    init_tracing();

    let s = setup(meeting_router_rules(true, true, true), "u1")?;
    s.meeting_unit.push_outcome(Outcome::Fail("calendar unreachable".to_string()));
    let meeting_run = start_meeting(&s).await;

    s.orchestrator.run(s.router, Settings::new()).await?;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Paused);
    // Paused, but its invocation is still executing.
    assert_eq!(s.orchestrator.get_orchestrator_status().running_count, 1);

    s.orchestrator.resume(s.meeting)?;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Running);
    let overlap = s.orchestrator.run(s.meeting, Settings::new()).await;
    assert!(matches!(overlap, Err(OrchestratorError::AlreadyRunning(_))), "{overlap:?}");

    s.gate.open();
    let meeting_result = with_timeout(meeting_run).await?;
    assert!(
        matches!(meeting_result, Err(OrchestratorError::ExecutionFailed { .. })),
        "{meeting_result:?}"
    );

    let meeting = s.orchestrator.get_status(s.meeting)?;
    assert_eq!(meeting.status, InstanceStatus::Error);
    assert!(meeting.last_run.is_none());
    assert_eq!(s.orchestrator.get_orchestrator_status().running_count, 0);
    Ok(())
}

#[tokio::test]
async fn symmetric_rule_applies_when_only_other_side_declares() -> TestResult {
    init_tracing();

    // Only meeting lists router; with symmetric conflicts a router run still
    // pauses the meeting.
    let s = setup(meeting_router_rules(true, true, false), "u1")?;
    let meeting_run = start_meeting(&s).await;

    s.orchestrator.run(s.router, Settings::new()).await?;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Paused);

    s.gate.open();
    with_timeout(meeting_run).await??;
    Ok(())
}

#[tokio::test]
async fn asymmetric_rule_only_consults_candidate() -> TestResult {
    init_tracing();

    let s = setup(meeting_router_rules(false, true, false), "u1")?;
    let meeting_run = start_meeting(&s).await;

    s.orchestrator.run(s.router, Settings::new()).await?;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Running);

    s.gate.open();
    with_timeout(meeting_run).await??;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Idle);
    Ok(())
}

#[tokio::test]
async fn conflicts_never_cross_users() -> TestResult {
    init_tracing();

    let s = setup(meeting_router_rules(true, true, true), "u2")?;
    let meeting_run = start_meeting(&s).await;

    s.orchestrator.run(s.router, Settings::new()).await?;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Running);

    s.gate.open();
    with_timeout(meeting_run).await??;
    Ok(())
}

#[tokio::test]
async fn unrelated_units_run_side_by_side() -> TestResult {
    init_tracing();

    let s = setup(RuleTable::default(), "u1")?;
    let meeting_run = start_meeting(&s).await;

    s.orchestrator.run(s.router, Settings::new()).await?;
    assert_eq!(s.orchestrator.get_status(s.meeting)?.status, InstanceStatus::Running);
    assert_eq!(s.orchestrator.get_orchestrator_status().running_count, 1);

    s.gate.open();
    with_timeout(meeting_run).await??;
    assert_eq!(s.orchestrator.get_orchestrator_status().running_count, 0);
    Ok(())
}
