// src/engine/mod.rs

//! Orchestration engine.
//!
//! - [`orchestrator`] owns units, instances and the `run` operation.
//! - [`perf`] keeps per-instance execution statistics.
//! - [`scheduler`] selects due instances on a fixed tick and hands them to
//!   the [`dispatch`] layer, which spawns the runs.

pub mod dispatch;
pub mod orchestrator;
pub mod perf;
pub mod scheduler;

pub use dispatch::{DispatchOutcome, Dispatcher};
pub use orchestrator::{
    InstanceStatusReport, Orchestrator, OrchestratorStatus, SettingsUpdate,
    DEFAULT_AUTO_RUN_INTERVAL,
};
pub use perf::{PerformanceStats, PerformanceTracker};
pub use scheduler::{is_due, select_due, SchedulerLoop, TickReport, DEFAULT_TICK_INTERVAL};
