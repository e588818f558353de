// src/registry/mod.rs

//! Instance registry.
//!
//! Holds at most one [`Instance`] per (user, unit type) in arena-style slot
//! storage behind a single mutex. Every status transition happens inside one
//! critical section, which is what makes `begin_run` a compare-and-swap: two
//! concurrent triggers for the same instance can never both observe it as
//! runnable. The lock is never held across an `.await`.
//!
//! Status changes are published to the [`NotificationSink`] after the lock is
//! released.

pub mod instance;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::errors::{OrchestratorError, Result};
use crate::notify::{NotificationSink, OrchestratorEvent};
use crate::types::{InstanceId, InstanceStatus, UnitType, UserId};

pub use instance::{Instance, InstanceSnapshot, StatusChange};

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Option<Instance>>,
    free: Vec<usize>,
    by_id: HashMap<InstanceId, usize>,
    by_key: HashMap<(UserId, UnitType), usize>,
}

impl Arena {
    fn get(&self, id: &InstanceId) -> Option<&Instance> {
        let idx = *self.by_id.get(id)?;
        self.slots.get(idx)?.as_ref()
    }

    fn get_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        let idx = *self.by_id.get(id)?;
        self.slots.get_mut(idx)?.as_mut()
    }

    fn live(&self) -> impl Iterator<Item = &Instance> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    fn insert(&mut self, instance: Instance) -> usize {
        let key = (instance.user_id.clone(), instance.unit_type.clone());
        let id = instance.id;
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(instance);
                idx
            }
            None => {
                self.slots.push(Some(instance));
                self.slots.len() - 1
            }
        };
        self.by_id.insert(id, idx);
        self.by_key.insert(key, idx);
        idx
    }

    fn remove(&mut self, id: &InstanceId) -> Option<Instance> {
        let idx = self.by_id.remove(id)?;
        let instance = self.slots.get_mut(idx)?.take()?;
        self.by_key
            .remove(&(instance.user_id.clone(), instance.unit_type.clone()));
        self.free.push(idx);
        Some(instance)
    }
}

/// Owner of all instances.
pub struct InstanceRegistry {
    inner: Mutex<Arena>,
    sink: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("instances", &self.len())
            .finish_non_exhaustive()
    }
}

impl InstanceRegistry {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            inner: Mutex::new(Arena::default()),
            sink,
        }
    }

    fn arena(&self) -> MutexGuard<'_, Arena> {
        // A panic while holding the lock cannot leave an instance half
        // updated: every mutation below is a plain field assignment.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_change(&self, change: StatusChange) {
        if change.is_noop() {
            return;
        }
        self.sink.publish(OrchestratorEvent::StatusChanged {
            instance_id: change.instance_id,
            from: change.from,
            to: change.to,
        });
    }

    /// Insert a new instance. Fails if (user, unit type) is already taken.
    pub fn insert(&self, instance: Instance) -> Result<InstanceId> {
        let mut arena = self.arena();
        let key = (instance.user_id.clone(), instance.unit_type.clone());

        if let Some(&idx) = arena.by_key.get(&key) {
            if let Some(existing) = arena.slots.get(idx).and_then(|s| s.as_ref()) {
                return Err(OrchestratorError::AlreadyExists {
                    user_id: key.0,
                    unit_type: key.1,
                    existing: existing.id,
                });
            }
        }

        let id = instance.id;
        let idx = arena.insert(instance);
        trace!(instance = %id, slot = idx, "instance inserted");
        Ok(id)
    }

    pub fn get(&self, id: &InstanceId) -> Option<InstanceSnapshot> {
        self.arena().get(id).map(Instance::snapshot)
    }

    /// Look up the instance of `unit_type` owned by `user_id`.
    pub fn find(&self, user_id: &str, unit_type: &str) -> Option<InstanceId> {
        let arena = self.arena();
        let idx = *arena
            .by_key
            .get(&(user_id.to_string(), unit_type.to_string()))?;
        arena.slots.get(idx)?.as_ref().map(|i| i.id)
    }

    /// Unconditionally set the status of an instance.
    ///
    /// Run bookkeeping (`in_flight`) is untouched; prefer the dedicated
    /// transitions below for anything on the run path.
    pub fn set_status(&self, id: &InstanceId, status: InstanceStatus) -> Result<StatusChange> {
        let change = {
            let mut arena = self.arena();
            let instance = arena
                .get_mut(id)
                .ok_or(OrchestratorError::InstanceNotFound(*id))?;
            let from = instance.status;
            instance.status = status;
            StatusChange {
                instance_id: *id,
                from,
                to: status,
            }
        };
        self.publish_change(change);
        Ok(change)
    }

    /// Atomically claim the instance for one invocation.
    ///
    /// Succeeds only when nothing is in flight and the status is `idle` or
    /// `error`; the status becomes `running`.
    pub fn begin_run(&self, id: &InstanceId) -> Result<InstanceSnapshot> {
        let (snapshot, change) = {
            let mut arena = self.arena();
            let instance = arena
                .get_mut(id)
                .ok_or(OrchestratorError::InstanceNotFound(*id))?;

            if instance.in_flight {
                return Err(OrchestratorError::AlreadyRunning(*id));
            }
            let from = instance.status;
            match from {
                InstanceStatus::Idle | InstanceStatus::Error => {}
                InstanceStatus::Paused => return Err(OrchestratorError::InstancePaused(*id)),
                // Only reachable if someone forced the status via `set_status`.
                InstanceStatus::Running => return Err(OrchestratorError::AlreadyRunning(*id)),
            }

            instance.in_flight = true;
            instance.status = InstanceStatus::Running;
            let change = StatusChange {
                instance_id: *id,
                from,
                to: InstanceStatus::Running,
            };
            (instance.snapshot(), change)
        };

        debug!(instance = %id, from = %change.from, "run slot claimed");
        self.publish_change(change);
        Ok(snapshot)
    }

    /// Release the run slot claimed by [`begin_run`](Self::begin_run).
    ///
    /// Unless the instance was paused mid-flight (it then stays paused), it
    /// moves to `idle` (success) or `error` (failure).
    pub fn finish_run(
        &self,
        id: &InstanceId,
        success: bool,
        finished_at: DateTime<Utc>,
        performance_score: Option<f64>,
    ) -> Result<StatusChange> {
        let change = {
            let mut arena = self.arena();
            let instance = arena
                .get_mut(id)
                .ok_or(OrchestratorError::InstanceNotFound(*id))?;

            instance.in_flight = false;
            if success {
                instance.last_run = Some(finished_at);
            }
            if let Some(score) = performance_score {
                instance.performance_score = score.clamp(0.0, 1.0);
            }

            let from = instance.status;
            if from != InstanceStatus::Paused {
                instance.status = if success {
                    InstanceStatus::Idle
                } else {
                    InstanceStatus::Error
                };
            }
            StatusChange {
                instance_id: *id,
                from,
                to: instance.status,
            }
        };

        self.publish_change(change);
        Ok(change)
    }

    /// Move an instance to `paused`. Calling this on a paused instance is a
    /// no-op. An in-flight invocation is not interrupted.
    pub fn pause(&self, id: &InstanceId) -> Result<StatusChange> {
        self.transition(id, |_| Some(InstanceStatus::Paused))
    }

    /// Move a `paused` or `error` instance back to `idle`; no-op otherwise.
    ///
    /// A paused instance whose invocation is still in flight goes back to
    /// `running`, so the outcome is applied when the invocation finishes.
    pub fn resume(&self, id: &InstanceId) -> Result<StatusChange> {
        self.transition(id, |instance| match instance.status {
            InstanceStatus::Paused | InstanceStatus::Error if instance.in_flight => {
                Some(InstanceStatus::Running)
            }
            InstanceStatus::Paused | InstanceStatus::Error => Some(InstanceStatus::Idle),
            InstanceStatus::Idle | InstanceStatus::Running => None,
        })
    }

    /// Apply the status chosen by `next`, if any, under the lock.
    fn transition<F>(&self, id: &InstanceId, next: F) -> Result<StatusChange>
    where
        F: FnOnce(&Instance) -> Option<InstanceStatus>,
    {
        let change = {
            let mut arena = self.arena();
            let instance = arena
                .get_mut(id)
                .ok_or(OrchestratorError::InstanceNotFound(*id))?;
            let from = instance.status;
            if let Some(to) = next(instance) {
                instance.status = to;
            }
            StatusChange {
                instance_id: *id,
                from,
                to: instance.status,
            }
        };
        self.publish_change(change);
        Ok(change)
    }

    /// Apply a non-status mutation (settings, auto-run, score).
    pub fn update<F>(&self, id: &InstanceId, f: F) -> Result<InstanceSnapshot>
    where
        F: FnOnce(&mut Instance),
    {
        let mut arena = self.arena();
        let instance = arena
            .get_mut(id)
            .ok_or(OrchestratorError::InstanceNotFound(*id))?;
        let status = instance.status;
        let in_flight = instance.in_flight;
        f(instance);
        instance.status = status;
        instance.in_flight = in_flight;
        Ok(instance.snapshot())
    }

    /// Remove an instance. Refused while an invocation is in flight.
    pub fn remove(&self, id: &InstanceId) -> Result<InstanceSnapshot> {
        let mut arena = self.arena();
        match arena.get(id) {
            None => return Err(OrchestratorError::InstanceNotFound(*id)),
            Some(instance) if instance.in_flight => {
                return Err(OrchestratorError::AlreadyRunning(*id));
            }
            Some(_) => {}
        }
        arena
            .remove(id)
            .map(|i| i.snapshot())
            .ok_or(OrchestratorError::InstanceNotFound(*id))
    }

    pub fn instances_for_user(&self, user_id: &str) -> Vec<InstanceSnapshot> {
        self.arena()
            .live()
            .filter(|i| i.user_id == user_id)
            .map(Instance::snapshot)
            .collect()
    }

    pub fn snapshots(&self) -> Vec<InstanceSnapshot> {
        self.arena().live().map(Instance::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.arena().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Instances with an invocation in flight, including ones paused while
    /// their invocation was running.
    pub fn running_count(&self) -> usize {
        self.arena()
            .live()
            .filter(|i| i.in_flight || i.status == InstanceStatus::Running)
            .count()
    }
}
