// src/registry/instance.rs

//! Per-user instance records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{InstanceId, InstanceStatus, Settings, UnitType, UserId};

/// One user's running configuration of a unit type.
///
/// Owned by the [`InstanceRegistry`](super::InstanceRegistry); callers only
/// ever see [`InstanceSnapshot`] copies.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: InstanceId,
    pub user_id: UserId,
    pub unit_type: UnitType,
    pub status: InstanceStatus,
    /// Instance-level settings. Unit defaults are merged in at invocation time.
    pub settings: Settings,
    pub auto_run_enabled: bool,
    pub auto_run_interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    /// Rolling success rate in `[0, 1]`.
    pub performance_score: f64,
    pub created_at: DateTime<Utc>,
    /// True between `begin_run` and `finish_run`. The status can drift away
    /// from `running` while this is set (a conflict may pause the instance).
    pub(crate) in_flight: bool,
}

impl Instance {
    pub fn new(
        user_id: impl Into<UserId>,
        unit_type: impl Into<UnitType>,
        settings: Settings,
        auto_run_interval: Duration,
    ) -> Self {
        Self {
            id: InstanceId::new(),
            user_id: user_id.into(),
            unit_type: unit_type.into(),
            status: InstanceStatus::Idle,
            settings,
            auto_run_enabled: false,
            auto_run_interval,
            last_run: None,
            performance_score: 0.0,
            created_at: Utc::now(),
            in_flight: false,
        }
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            unit_type: self.unit_type.clone(),
            status: self.status,
            settings: self.settings.clone(),
            auto_run_enabled: self.auto_run_enabled,
            auto_run_interval: self.auto_run_interval,
            last_run: self.last_run,
            performance_score: self.performance_score,
            created_at: self.created_at,
            in_flight: self.in_flight,
        }
    }
}

/// Point-in-time copy of an [`Instance`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub user_id: UserId,
    pub unit_type: UnitType,
    pub status: InstanceStatus,
    pub settings: Settings,
    pub auto_run_enabled: bool,
    pub auto_run_interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub performance_score: f64,
    pub created_at: DateTime<Utc>,
    pub in_flight: bool,
}

/// A status transition performed by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub instance_id: InstanceId,
    pub from: InstanceStatus,
    pub to: InstanceStatus,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}
