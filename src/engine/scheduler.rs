// src/engine/scheduler.rs

//! Periodic auto-run trigger.
//!
//! [`select_due`] is the pure selection step; [`SchedulerLoop`] wraps it in a
//! tokio interval and hands the selected instances to a [`Dispatcher`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coord::RuleTable;
use crate::engine::dispatch::{DispatchOutcome, Dispatcher};
use crate::engine::orchestrator::Orchestrator;
use crate::registry::InstanceSnapshot;
use crate::types::{InstanceId, InstanceStatus};

/// Default time between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Whether `instance` should be auto-run at `now`.
pub fn is_due(instance: &InstanceSnapshot, now: DateTime<Utc>) -> bool {
    if !instance.auto_run_enabled || instance.in_flight || instance.status != InstanceStatus::Idle {
        return false;
    }
    match instance.last_run {
        None => true,
        // A last_run in the future (clock skew) is treated as not due.
        Some(last) => (now - last)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= instance.auto_run_interval),
    }
}

/// Pick the instances due at `now`.
///
/// Ordered by unit priority (lower first), then by the oldest `last_run`
/// (never-run instances first), then by id for a stable order.
pub fn select_due(
    instances: &[InstanceSnapshot],
    rules: &RuleTable,
    now: DateTime<Utc>,
) -> Vec<InstanceId> {
    let mut due: Vec<&InstanceSnapshot> = instances.iter().filter(|i| is_due(i, now)).collect();
    due.sort_by(|a, b| {
        rules
            .priority_of(&a.unit_type)
            .cmp(&rules.priority_of(&b.unit_type))
            .then_with(|| a.last_run.cmp(&b.last_run))
            .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
    });
    due.into_iter().map(|i| i.id).collect()
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub selected: Vec<InstanceId>,
    pub dispatched: usize,
    /// Selected but a previous dispatched run was still alive.
    pub skipped: usize,
}

/// Drives auto-runs on a fixed tick until cancelled.
#[derive(Debug)]
pub struct SchedulerLoop {
    orchestrator: Arc<Orchestrator>,
    dispatcher: Dispatcher,
    tick: Duration,
}

impl SchedulerLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, tick: Duration) -> Self {
        let tick = if tick.is_zero() { DEFAULT_TICK_INTERVAL } else { tick };
        Self {
            dispatcher: Dispatcher::new(Arc::clone(&orchestrator)),
            orchestrator,
            tick,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Run one tick at wall-clock time now.
    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Utc::now())
    }

    /// Run one tick as if the current time were `now`.
    ///
    /// Runs are spawned, not awaited; a slow unit never delays the tick.
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> TickReport {
        let selected = self.orchestrator.due_instances(now);
        let mut report = TickReport {
            selected: selected.clone(),
            ..TickReport::default()
        };

        for id in selected {
            match self.dispatcher.dispatch(id) {
                DispatchOutcome::Spawned => report.dispatched += 1,
                DispatchOutcome::StillRunning => report.skipped += 1,
            }
        }

        if report.selected.is_empty() {
            debug!("scheduler tick: nothing due");
        } else {
            info!(
                due = report.selected.len(),
                dispatched = report.dispatched,
                skipped = report.skipped,
                "scheduler tick"
            );
        }
        report
    }

    /// Wait for every run started by this loop to finish.
    pub async fn drain(&mut self) {
        self.dispatcher.drain().await;
    }

    /// Tick until `token` is cancelled, then wait for in-flight runs.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick = ?self.tick, "scheduler loop started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }

        info!("scheduler loop stopping");
        self.drain().await;
        info!("scheduler loop finished");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}
