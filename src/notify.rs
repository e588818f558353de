// src/notify.rs

//! Status events and the sinks they are published to.
//!
//! Delivery is fire-and-forget: `publish` never fails and never blocks, and a
//! sink that can no longer deliver simply drops the event.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::exec::ExecutionResult;
use crate::types::{InstanceId, InstanceStatus, UnitType, UserId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OrchestratorEvent {
    InstanceCreated {
        instance_id: InstanceId,
        user_id: UserId,
        unit_type: UnitType,
    },
    InstanceRemoved {
        instance_id: InstanceId,
        user_id: UserId,
        unit_type: UnitType,
    },
    StatusChanged {
        instance_id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    },
    RunCompleted {
        instance_id: InstanceId,
        result: ExecutionResult,
    },
    RunFailed {
        instance_id: InstanceId,
        error: String,
        duration_ms: u64,
    },
}

impl OrchestratorEvent {
    pub fn instance_id(&self) -> InstanceId {
        match self {
            OrchestratorEvent::InstanceCreated { instance_id, .. }
            | OrchestratorEvent::InstanceRemoved { instance_id, .. }
            | OrchestratorEvent::StatusChanged { instance_id, .. }
            | OrchestratorEvent::RunCompleted { instance_id, .. }
            | OrchestratorEvent::RunFailed { instance_id, .. } => *instance_id,
        }
    }

    /// The kebab-case event name (`"run-completed"`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::InstanceCreated { .. } => "instance-created",
            OrchestratorEvent::InstanceRemoved { .. } => "instance-removed",
            OrchestratorEvent::StatusChanged { .. } => "status-changed",
            OrchestratorEvent::RunCompleted { .. } => "run-completed",
            OrchestratorEvent::RunFailed { .. } => "run-failed",
        }
    }
}

/// Destination for orchestrator events.
pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: OrchestratorEvent);
}

/// Writes every event to the log. Used by the CLI.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::RunFailed {
                instance_id,
                ref error,
                duration_ms,
            } => {
                warn!(instance = %instance_id, duration_ms, error = %error, "run-failed");
            }
            OrchestratorEvent::StatusChanged {
                instance_id,
                from,
                to,
            } => {
                debug!(instance = %instance_id, %from, %to, "status-changed");
            }
            other => {
                let payload = serde_json::to_string(&other).unwrap_or_default();
                info!(instance = %other.instance_id(), event = other.name(), %payload, "event");
            }
        }
    }
}

/// Forwards events over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OrchestratorEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OrchestratorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: OrchestratorEvent) {
        if self.tx.send(event).is_err() {
            debug!("event receiver dropped; discarding event");
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn publish(&self, _event: OrchestratorEvent) {}
}
