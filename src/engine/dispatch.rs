// src/engine/dispatch.rs

//! Spawns scheduler-triggered runs and keeps track of their tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::orchestrator::Orchestrator;
use crate::errors::OrchestratorError;
use crate::types::{InstanceId, Settings};

/// Outcome of asking the dispatcher to start one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Spawned,
    /// A previously dispatched run of this instance is still going.
    StillRunning,
}

/// Owns the tokio tasks of runs started by the scheduler.
///
/// At most one dispatched task per instance is alive at a time; the
/// orchestrator's own claim still rejects overlapping explicit runs.
#[derive(Debug)]
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    active: HashMap<InstanceId, JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            active: HashMap::new(),
        }
    }

    /// Start a background run of `id` unless one is already alive.
    pub fn dispatch(&mut self, id: InstanceId) -> DispatchOutcome {
        self.reap();
        if self.active.contains_key(&id) {
            debug!(instance = %id, "dispatched run still in progress; skipping");
            return DispatchOutcome::StillRunning;
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move {
            match orchestrator.run(id, Settings::new()).await {
                Ok(result) => debug!(instance = %id, duration_ms = result.duration_ms, "scheduled run finished"),
                // Raced with an explicit run or a pause; nothing to do.
                Err(e @ (OrchestratorError::AlreadyRunning(_) | OrchestratorError::InstancePaused(_))) => {
                    debug!(instance = %id, reason = %e, "scheduled run not started")
                }
                // Already reported through the sink.
                Err(OrchestratorError::ExecutionFailed { .. }) => {}
                Err(e) => warn!(instance = %id, error = %e, "scheduled run could not start"),
            }
        });
        self.active.insert(id, handle);
        DispatchOutcome::Spawned
    }

    /// Drop handles of tasks that have finished.
    pub fn reap(&mut self) {
        self.active.retain(|_, handle| !handle.is_finished());
    }

    /// Wait for every dispatched run to finish.
    pub async fn drain(&mut self) {
        if self.active.is_empty() {
            return;
        }
        info!(count = self.active.len(), "waiting for dispatched runs to finish");
        for (id, handle) in self.active.drain() {
            if let Err(e) = handle.await {
                warn!(instance = %id, error = %e, "dispatched run task panicked or was cancelled");
            }
        }
    }
}
