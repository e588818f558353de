// src/engine/perf.rs

//! Per-instance execution statistics.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::trace;

use crate::errors::{OrchestratorError, Result};
use crate::exec::ExecutionResult;
use crate::types::InstanceId;

/// Rolling statistics for one instance.
///
/// Both averages use the incremental mean `avg += (sample - avg) / n`, so no
/// history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PerformanceStats {
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub total_runs: u64,
}

impl PerformanceStats {
    fn record(&mut self, success: bool, duration_ms: u64) {
        self.total_runs += 1;
        let n = self.total_runs as f64;
        let sample = if success { 1.0 } else { 0.0 };
        self.success_rate += (sample - self.success_rate) / n;
        self.avg_duration_ms += (duration_ms as f64 - self.avg_duration_ms) / n;
    }
}

#[derive(Debug, Default)]
pub struct PerformanceTracker {
    stats: Mutex<HashMap<InstanceId, PerformanceStats>>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats(&self) -> MutexGuard<'_, HashMap<InstanceId, PerformanceStats>> {
        self.stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start tracking an instance with empty statistics.
    pub fn track(&self, id: InstanceId) {
        self.stats().entry(id).or_default();
    }

    /// Start tracking an instance with previously persisted statistics.
    pub fn track_with(&self, id: InstanceId, stats: PerformanceStats) {
        self.stats().insert(id, stats);
    }

    pub fn untrack(&self, id: &InstanceId) {
        self.stats().remove(id);
    }

    pub fn record_execution(&self, id: &InstanceId, result: &ExecutionResult) -> Result<PerformanceStats> {
        let mut stats = self.stats();
        let entry = stats
            .get_mut(id)
            .ok_or(OrchestratorError::InstanceNotFound(*id))?;
        entry.record(result.success, result.duration_ms);
        trace!(
            instance = %id,
            success = result.success,
            total_runs = entry.total_runs,
            success_rate = entry.success_rate,
            "recorded execution"
        );
        Ok(*entry)
    }

    pub fn get_performance(&self, id: &InstanceId) -> Result<PerformanceStats> {
        self.stats()
            .get(id)
            .copied()
            .ok_or(OrchestratorError::InstanceNotFound(*id))
    }
}
