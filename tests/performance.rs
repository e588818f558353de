// tests/performance.rs

use std::error::Error;

use agentvisor::coord::RuleTable;
use agentvisor::engine::PerformanceTracker;
use agentvisor::errors::OrchestratorError;
use agentvisor::exec::ExecutionResult;
use agentvisor::types::{InstanceId, Settings};
use agentvisor_test_utils::{init_tracing, FakeUnit, Harness, Outcome};
use serde_json::json;

type TestResult = Result<(), Box<dyn Error>>;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn one_success_one_failure_gives_half() -> TestResult {
    init_tracing();

    let unit = FakeUnit::new();
    unit.push_outcome(Outcome::Succeed(json!({})))
        .push_outcome(Outcome::Fail("nope".to_string()));
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;

    h.orchestrator.run(id, Settings::new()).await?;
    assert!(h.orchestrator.run(id, Settings::new()).await.is_err());

    let perf = h.orchestrator.get_performance(id)?;
    assert_eq!(perf.total_runs, 2);
    assert!(approx(perf.success_rate, 0.5), "success_rate = {}", perf.success_rate);

    // The instance score mirrors the rolling success rate.
    assert!(approx(h.orchestrator.get_status(id)?.performance_score, 0.5));

    // Persisted alongside the row.
    let row = h.store.get("u1", "report").expect("stored row");
    assert_eq!(row.total_runs, 2);
    assert!(approx(row.performance_score, 0.5));
    Ok(())
}

#[test]
fn incremental_mean_tracks_durations() -> TestResult {
    init_tracing();

    let tracker = PerformanceTracker::new();
    let id = InstanceId::new();
    tracker.track(id);

    tracker.record_execution(&id, &ExecutionResult::succeeded(json!(null), 100))?;
    tracker.record_execution(&id, &ExecutionResult::succeeded(json!(null), 200))?;
    let err = anyhow::anyhow!("failed");
    let stats = tracker.record_execution(&id, &ExecutionResult::failed(&err, 600))?;

    assert_eq!(stats.total_runs, 3);
    assert!(approx(stats.avg_duration_ms, 300.0), "avg = {}", stats.avg_duration_ms);
    assert!(approx(stats.success_rate, 2.0 / 3.0));
    assert_eq!(tracker.get_performance(&id)?, stats);
    Ok(())
}

#[test]
fn untracked_instance_is_not_found() {
    let tracker = PerformanceTracker::new();
    let id = InstanceId::new();
    let result = ExecutionResult::succeeded(json!(null), 1);

    assert!(matches!(
        tracker.record_execution(&id, &result),
        Err(OrchestratorError::InstanceNotFound(got)) if got == id
    ));
    assert!(matches!(
        tracker.get_performance(&id),
        Err(OrchestratorError::InstanceNotFound(_))
    ));

    tracker.track(id);
    tracker.untrack(&id);
    assert!(tracker.get_performance(&id).is_err());
}

#[test]
fn fresh_instance_has_zero_stats() -> TestResult {
    let unit = FakeUnit::new();
    let h = Harness::new(RuleTable::default(), &[("report", &unit)]);
    let id = h.orchestrator.create_instance("u1", "report", Settings::new())?;

    let perf = h.orchestrator.get_performance(id)?;
    assert_eq!(perf.total_runs, 0);
    assert_eq!(perf.success_rate, 0.0);
    assert_eq!(perf.avg_duration_ms, 0.0);
    Ok(())
}
