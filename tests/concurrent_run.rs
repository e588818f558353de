// tests/concurrent_run.rs

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use agentvisor::coord::RuleTable;
use agentvisor::errors::OrchestratorError;
use agentvisor::types::{InstanceStatus, Settings};
use agentvisor_test_utils::{init_tracing, with_timeout, FakeUnit, Harness};

type TestResult = Result<(), Box<dyn Error>>;

const CALLERS: usize = 16;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_execute_unit_exactly_once() -> TestResult {
    init_tracing();

    let (unit, gate) = FakeUnit::gated();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    let orchestrator = Arc::new(h.orchestrator);

    let (tx, mut rx) = mpsc::unbounded_channel();
    for _ in 0..CALLERS {
        let orch = Arc::clone(&orchestrator);
        let tx = tx.clone();
        tokio::spawn(async move {
            let res = orch.run(id, Settings::new()).await;
            let _ = tx.send(res);
        });
    }
    drop(tx);

    // The winner is parked on the gate, so every other caller must come back
    // before anything is released.
    let mut rejected = 0;
    for _ in 0..CALLERS - 1 {
        let res = with_timeout(rx.recv()).await.expect("result channel closed early");
        match res {
            Err(OrchestratorError::AlreadyRunning(got)) => {
                assert_eq!(got, id);
                rejected += 1;
            }
            other => panic!("expected AlreadyRunning, got {other:?}"),
        }
    }
    assert_eq!(rejected, CALLERS - 1);
    assert_eq!(orchestrator.get_status(id)?.status, InstanceStatus::Running);

    gate.open();
    let winner = with_timeout(rx.recv()).await.expect("winner result missing");
    assert!(winner?.success);
    assert!(with_timeout(rx.recv()).await.is_none());

    assert_eq!(unit.calls(), 1);
    assert_eq!(orchestrator.get_status(id)?.status, InstanceStatus::Idle);
    assert_eq!(orchestrator.get_performance(id)?.total_runs, 1);
    Ok(())
}

#[tokio::test]
async fn run_is_rejected_while_in_flight_and_accepted_after() -> TestResult {
    init_tracing();

    let (unit, gate) = FakeUnit::gated();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    let orchestrator = Arc::new(h.orchestrator);

    let first = {
        let orch = Arc::clone(&orchestrator);
        tokio::spawn(async move { orch.run(id, Settings::new()).await })
    };
    with_timeout(unit.wait_started()).await;

    assert!(matches!(
        orchestrator.run(id, Settings::new()).await,
        Err(OrchestratorError::AlreadyRunning(_))
    ));
    assert!(matches!(
        orchestrator.remove_instance(id),
        Err(OrchestratorError::AlreadyRunning(_))
    ));

    gate.release(1);
    with_timeout(first).await??;

    gate.release(1);
    orchestrator.run(id, Settings::new()).await?;
    assert_eq!(unit.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn dropped_run_future_releases_the_instance() -> TestResult {
    init_tracing();

    let (unit, gate) = FakeUnit::gated();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;
    let orchestrator = Arc::new(h.orchestrator);

    let handle = {
        let orch = Arc::clone(&orchestrator);
        tokio::spawn(async move { orch.run(id, Settings::new()).await })
    };
    with_timeout(unit.wait_started()).await;
    handle.abort();
    assert!(with_timeout(handle).await.is_err());

    let status = orchestrator.get_status(id)?;
    assert_eq!(status.status, InstanceStatus::Error);
    assert_eq!(orchestrator.get_performance(id)?.total_runs, 1);

    gate.open();
    orchestrator.run(id, Settings::new()).await?;
    assert_eq!(orchestrator.get_status(id)?.status, InstanceStatus::Idle);
    Ok(())
}
