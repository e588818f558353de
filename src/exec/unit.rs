// src/exec/unit.rs

//! Pluggable execution unit abstraction.
//!
//! The orchestrator talks to an `ExecutionUnit` instead of knowing what the
//! work is. Production units live in [`command`](super::command) and
//! [`builtin`](super::builtin); tests provide their own implementation that
//! records invocations and can be held open or made to fail.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::types::{InstanceId, Settings, UnitType, UserId};

/// Future returned by [`ExecutionUnit::execute`].
pub type UnitFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send + 'a>>;

/// A strategy performing one kind of work.
///
/// Units are stateless between runs: everything an invocation needs is in the
/// context and params. An invocation may suspend for an unbounded time.
pub trait ExecutionUnit: Send + Sync {
    /// Perform one unit of work and return its payload.
    fn execute(&self, ctx: ExecutionContext, params: Settings) -> UnitFuture<'_>;
}

/// What an invocation knows about the instance it runs for.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    pub instance_id: InstanceId,
    pub user_id: UserId,
    pub unit_type: UnitType,
    /// Unit defaults overlaid with the instance's own settings.
    pub config: Settings,
}

/// Outcome of one invocation, as recorded and published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub payload: Value,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn succeeded(payload: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            payload,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(error: &anyhow::Error, duration_ms: u64) -> Self {
        Self {
            success: false,
            payload: serde_json::json!({ "error": format!("{error:#}") }),
            duration_ms,
            finished_at: Utc::now(),
        }
    }
}

/// A registered unit type: its implementation plus default configuration.
#[derive(Clone)]
pub struct UnitDefinition {
    pub unit_type: UnitType,
    pub unit: Arc<dyn ExecutionUnit>,
    pub default_config: Settings,
}

impl fmt::Debug for UnitDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitDefinition")
            .field("unit_type", &self.unit_type)
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

impl UnitDefinition {
    /// Defaults overlaid with `settings`; keys in `settings` win.
    pub fn merged_config(&self, settings: &Settings) -> Settings {
        let mut merged = self.default_config.clone();
        for (k, v) in settings.iter() {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}
