// src/engine/orchestrator.rs

//! The orchestrator: unit registration, instance lifecycle and the run
//! operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::model::ConfigFile;
use crate::coord::{find_conflicts, resolve, ConflictAction, RuleTable};
use crate::engine::perf::{PerformanceStats, PerformanceTracker};
use crate::engine::scheduler::select_due;
use crate::errors::{OrchestratorError, Result};
use crate::exec::{unit_for_kind, ExecutionContext, ExecutionResult, ExecutionUnit, UnitDefinition};
use crate::notify::{NotificationSink, OrchestratorEvent};
use crate::registry::{Instance, InstanceRegistry, InstanceSnapshot};
use crate::store::{InstanceRecord, InstanceStore};
use crate::types::{InstanceId, InstanceStatus, Settings, UnitType, UserId};

/// Fallback auto-run interval when none is configured.
pub const DEFAULT_AUTO_RUN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Changes accepted by [`Orchestrator::update_settings`]. `None` leaves the
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    /// Replaces the instance settings wholesale.
    pub settings: Option<Settings>,
    pub auto_run_enabled: Option<bool>,
    pub auto_run_interval: Option<Duration>,
}

impl SettingsUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn auto_run(mut self, enabled: bool) -> Self {
        self.auto_run_enabled = Some(enabled);
        self
    }

    pub fn auto_run_interval(mut self, interval: Duration) -> Self {
        self.auto_run_interval = Some(interval);
        self
    }
}

/// Caller-facing view returned by [`Orchestrator::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatusReport {
    pub instance_id: InstanceId,
    pub user_id: UserId,
    pub unit_type: UnitType,
    pub status: InstanceStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub performance_score: f64,
    pub auto_run_enabled: bool,
    pub auto_run_interval: Duration,
}

/// Returned by [`Orchestrator::get_orchestrator_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatus {
    pub total_unit_types: usize,
    pub total_instances: usize,
    pub running_count: usize,
}

/// Registers units, owns instances and runs them.
///
/// Share it as `Arc<Orchestrator>` once registration is done; every
/// operation after that takes `&self`.
pub struct Orchestrator {
    units: HashMap<UnitType, UnitDefinition>,
    rules: RuleTable,
    registry: InstanceRegistry,
    perf: PerformanceTracker,
    store: Arc<dyn InstanceStore>,
    /// Held while a row is read from the registry and written, so the last
    /// write for an instance always carries its latest state.
    persist_lock: Mutex<()>,
    sink: Arc<dyn NotificationSink>,
    default_auto_run_interval: Duration,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut unit_types: Vec<&str> = self.units.keys().map(|s| s.as_str()).collect();
        unit_types.sort_unstable();
        f.debug_struct("Orchestrator")
            .field("units", &unit_types)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        rules: RuleTable,
        store: Arc<dyn InstanceStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            units: HashMap::new(),
            rules,
            registry: InstanceRegistry::new(Arc::clone(&sink)),
            perf: PerformanceTracker::new(),
            store,
            persist_lock: Mutex::new(()),
            sink,
            default_auto_run_interval: DEFAULT_AUTO_RUN_INTERVAL,
        }
    }

    /// Build an orchestrator from a validated config, registering one
    /// built-in unit per `[unit.<name>]` section.
    pub fn from_config(
        cfg: &ConfigFile,
        store: Arc<dyn InstanceStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let mut orchestrator = Self::new(RuleTable::from_config(cfg), store, sink)
            .with_default_auto_run_interval(cfg.orchestrator.default_auto_run_interval()?);

        for (name, unit) in cfg.unit.iter() {
            orchestrator.register(name.clone(), unit_for_kind(unit.kind), unit.config.clone())?;
        }

        Ok(orchestrator)
    }

    pub fn with_default_auto_run_interval(mut self, interval: Duration) -> Self {
        self.default_auto_run_interval = interval;
        self
    }

    /// Register a unit type. Called once per catalog entry at startup.
    pub fn register(
        &mut self,
        unit_type: impl Into<UnitType>,
        unit: Arc<dyn ExecutionUnit>,
        default_config: Settings,
    ) -> Result<()> {
        let unit_type = unit_type.into();
        if unit_type.trim().is_empty() {
            return Err(OrchestratorError::UnknownUnitType(unit_type));
        }
        if self.units.contains_key(&unit_type) {
            return Err(OrchestratorError::DuplicateUnitType(unit_type));
        }

        let rule = self.rules.rules_for(&unit_type);
        info!(
            unit = %unit_type,
            priority = rule.priority,
            conflicts = ?rule.conflicts_with,
            depends_on = ?rule.depends_on,
            "registered unit type"
        );

        self.units.insert(
            unit_type.clone(),
            UnitDefinition {
                unit_type,
                unit,
                default_config,
            },
        );
        Ok(())
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Create the instance of `unit_type` for `user_id`.
    pub fn create_instance(
        &self,
        user_id: impl Into<UserId>,
        unit_type: impl Into<UnitType>,
        settings: Settings,
    ) -> Result<InstanceId> {
        let user_id = user_id.into();
        let unit_type = unit_type.into();

        if !self.units.contains_key(&unit_type) {
            return Err(OrchestratorError::UnknownUnitType(unit_type));
        }

        let instance = Instance::new(
            user_id.clone(),
            unit_type.clone(),
            settings,
            self.default_auto_run_interval,
        );
        let id = self.registry.insert(instance)?;
        self.perf.track(id);
        self.persist(&id);

        info!(instance = %id, user = %user_id, unit = %unit_type, "instance created");
        self.sink.publish(OrchestratorEvent::InstanceCreated {
            instance_id: id,
            user_id,
            unit_type,
        });
        Ok(id)
    }

    /// Run an instance once and wait for the unit to finish.
    ///
    /// Concurrent calls for the same instance are serialised by an atomic
    /// claim: exactly one proceeds, the others get `AlreadyRunning`.
    pub async fn run(&self, id: InstanceId, params: Settings) -> Result<ExecutionResult> {
        let snapshot = self
            .registry
            .get(&id)
            .ok_or(OrchestratorError::InstanceNotFound(id))?;
        let definition = self
            .units
            .get(&snapshot.unit_type)
            .cloned()
            .ok_or_else(|| OrchestratorError::UnknownUnitType(snapshot.unit_type.clone()))?;

        let claimed = self.registry.begin_run(&id)?;
        let mut guard = RunGuard::new(self, id);
        self.persist(&id);

        self.resolve_conflicts(&claimed);
        self.log_pending_dependencies(&claimed);

        let ctx = ExecutionContext {
            instance_id: id,
            user_id: claimed.user_id.clone(),
            unit_type: claimed.unit_type.clone(),
            config: definition.merged_config(&claimed.settings),
        };

        debug!(instance = %id, user = %ctx.user_id, unit = %ctx.unit_type, "invoking unit");
        let outcome = definition.unit.execute(ctx, params).await;
        let duration_ms = guard.elapsed_ms();
        guard.disarm();

        match outcome {
            Ok(payload) => {
                let result = ExecutionResult::succeeded(payload, duration_ms);
                self.complete_run(&id, &result);
                info!(instance = %id, unit = %claimed.unit_type, duration_ms, "run completed");
                self.sink.publish(OrchestratorEvent::RunCompleted {
                    instance_id: id,
                    result: result.clone(),
                });
                Ok(result)
            }
            Err(err) => {
                let result = ExecutionResult::failed(&err, duration_ms);
                self.complete_run(&id, &result);
                warn!(instance = %id, unit = %claimed.unit_type, duration_ms, error = %format!("{err:#}"), "run failed");
                self.sink.publish(OrchestratorEvent::RunFailed {
                    instance_id: id,
                    error: format!("{err:#}"),
                    duration_ms,
                });
                Err(OrchestratorError::ExecutionFailed {
                    instance_id: id,
                    source: err,
                })
            }
        }
    }

    /// Record the outcome, release the run slot and persist.
    fn complete_run(&self, id: &InstanceId, result: &ExecutionResult) {
        let score = match self.perf.record_execution(id, result) {
            Ok(stats) => Some(stats.success_rate),
            Err(e) => {
                warn!(instance = %id, error = %e, "failed to record execution");
                None
            }
        };
        if let Err(e) = self
            .registry
            .finish_run(id, result.success, result.finished_at, score)
        {
            warn!(instance = %id, error = %e, "failed to release run slot");
        }
        self.persist(id);
    }

    /// Pause every running instance of the same user that conflicts with
    /// `candidate`. Failures are logged; the run goes ahead regardless.
    fn resolve_conflicts(&self, candidate: &InstanceSnapshot) {
        let peers = self.registry.instances_for_user(&candidate.user_id);
        let conflicts = find_conflicts(candidate, &peers, &self.rules);
        if conflicts.is_empty() {
            return;
        }

        for action in resolve(&conflicts) {
            match action {
                ConflictAction::PauseInstance(other) => match self.pause(other) {
                    Ok(()) => info!(
                        instance = %candidate.id,
                        unit = %candidate.unit_type,
                        paused = %other,
                        "paused conflicting instance"
                    ),
                    Err(e) => warn!(
                        instance = %candidate.id,
                        other = %other,
                        error = %e,
                        "conflict resolution failed; continuing run"
                    ),
                },
            }
        }
    }

    fn log_pending_dependencies(&self, candidate: &InstanceSnapshot) {
        for dep in self.rules.dependencies_of(&candidate.unit_type) {
            let dep_ran = self
                .registry
                .find(&candidate.user_id, dep)
                .and_then(|dep_id| self.registry.get(&dep_id))
                .is_some_and(|s| s.last_run.is_some());
            if !dep_ran {
                debug!(
                    instance = %candidate.id,
                    unit = %candidate.unit_type,
                    dependency = %dep,
                    "dependency has not completed a run for this user; running anyway"
                );
            }
        }
    }

    /// Pause an instance. Pausing an already paused instance is a no-op.
    pub fn pause(&self, id: InstanceId) -> Result<()> {
        let change = self.registry.pause(&id)?;
        if !change.is_noop() {
            info!(instance = %id, from = %change.from, "instance paused");
            self.persist(&id);
        }
        Ok(())
    }

    /// Return a paused or failed instance to `idle`. No-op otherwise.
    pub fn resume(&self, id: InstanceId) -> Result<()> {
        let change = self.registry.resume(&id)?;
        if !change.is_noop() {
            info!(instance = %id, from = %change.from, "instance resumed");
            self.persist(&id);
        }
        Ok(())
    }

    pub fn update_settings(&self, id: InstanceId, update: SettingsUpdate) -> Result<InstanceSnapshot> {
        let snapshot = self.registry.update(&id, |instance| {
            if let Some(settings) = update.settings {
                instance.settings = settings;
            }
            if let Some(enabled) = update.auto_run_enabled {
                instance.auto_run_enabled = enabled;
            }
            if let Some(interval) = update.auto_run_interval {
                instance.auto_run_interval = interval;
            }
        })?;
        debug!(
            instance = %id,
            auto_run = snapshot.auto_run_enabled,
            interval = ?snapshot.auto_run_interval,
            "instance settings updated"
        );
        self.persist(&id);
        Ok(snapshot)
    }

    pub fn get_status(&self, id: InstanceId) -> Result<InstanceStatusReport> {
        let s = self.get_instance(id)?;
        Ok(InstanceStatusReport {
            instance_id: s.id,
            user_id: s.user_id,
            unit_type: s.unit_type,
            status: s.status,
            last_run: s.last_run,
            performance_score: s.performance_score,
            auto_run_enabled: s.auto_run_enabled,
            auto_run_interval: s.auto_run_interval,
        })
    }

    pub fn get_orchestrator_status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            total_unit_types: self.units.len(),
            total_instances: self.registry.len(),
            running_count: self.registry.running_count(),
        }
    }

    pub fn get_performance(&self, id: InstanceId) -> Result<PerformanceStats> {
        self.perf.get_performance(&id)
    }

    pub fn get_instance(&self, id: InstanceId) -> Result<InstanceSnapshot> {
        self.registry
            .get(&id)
            .ok_or(OrchestratorError::InstanceNotFound(id))
    }

    pub fn find_instance(&self, user_id: &str, unit_type: &str) -> Option<InstanceId> {
        self.registry.find(user_id, unit_type)
    }

    pub fn list_instances(&self, user_id: &str) -> Vec<InstanceSnapshot> {
        let mut instances = self.registry.instances_for_user(user_id);
        instances.sort_by(|a, b| a.unit_type.cmp(&b.unit_type));
        instances
    }

    pub fn all_instances(&self) -> Vec<InstanceSnapshot> {
        self.registry.snapshots()
    }

    /// Delete an instance and its stored row. Refused while it is running.
    pub fn remove_instance(&self, id: InstanceId) -> Result<()> {
        let removed = self.registry.remove(&id)?;
        self.perf.untrack(&id);
        {
            let _guard = self.persist_lock.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(e) = self.store.remove(&removed.user_id, &removed.unit_type) {
                warn!(instance = %id, error = %format!("{e:#}"), "failed to remove stored instance row");
            }
        }
        info!(instance = %id, user = %removed.user_id, unit = %removed.unit_type, "instance removed");
        self.sink.publish(OrchestratorEvent::InstanceRemoved {
            instance_id: id,
            user_id: removed.user_id,
            unit_type: removed.unit_type,
        });
        Ok(())
    }

    /// Instances the scheduler should trigger at `now`, in dispatch order.
    pub fn due_instances(&self, now: DateTime<Utc>) -> Vec<InstanceId> {
        select_due(&self.registry.snapshots(), &self.rules, now)
    }

    /// Load every stored row into the registry.
    ///
    /// Rows whose (user, unit type) is already present are skipped. A row
    /// stored as `running` belongs to a run that never finished (the process
    /// went away), so it comes back as `idle`.
    pub fn restore(&self) -> Result<usize> {
        let records = self
            .store
            .load_all()
            .map_err(|e| OrchestratorError::Store(format!("{e:#}")))?;

        let mut restored = 0;
        for record in records {
            if self.registry.find(&record.user_id, &record.unit_type).is_some() {
                debug!(user = %record.user_id, unit = %record.unit_type, "instance already present; skipping stored row");
                continue;
            }
            if !self.units.contains_key(&record.unit_type) {
                warn!(
                    instance = %record.instance_id,
                    unit = %record.unit_type,
                    "restoring instance of an unregistered unit type; it cannot run until the unit is registered"
                );
            }

            let was_running = record.status == InstanceStatus::Running;
            let status = if was_running {
                warn!(instance = %record.instance_id, "stored instance was mid-run; resetting to idle");
                InstanceStatus::Idle
            } else {
                record.status
            };

            let instance = Instance {
                id: record.instance_id,
                user_id: record.user_id.clone(),
                unit_type: record.unit_type.clone(),
                status,
                settings: record.settings.clone(),
                auto_run_enabled: record.auto_run_enabled,
                auto_run_interval: record.auto_run_interval(),
                last_run: record.last_run,
                performance_score: record.performance_score,
                created_at: record.created_at,
                in_flight: false,
            };
            let id = self.registry.insert(instance)?;
            self.perf.track_with(
                id,
                PerformanceStats {
                    success_rate: record.performance_score,
                    avg_duration_ms: record.avg_duration_ms,
                    total_runs: record.total_runs,
                },
            );
            if was_running {
                self.persist(&id);
            }
            restored += 1;
        }

        info!(restored, "restored instances from store");
        Ok(restored)
    }

    /// Write the current row for `id` to the store. Best effort.
    fn persist(&self, id: &InstanceId) {
        let _guard = self.persist_lock.lock().unwrap_or_else(|p| p.into_inner());
        // Read under the lock: a concurrent persist that wrote before us
        // carried an older state.
        let Some(snapshot) = self.registry.get(id) else {
            return;
        };
        let stats = self.perf.get_performance(id).unwrap_or_default();
        let record = InstanceRecord::from_snapshot(&snapshot, stats.total_runs, stats.avg_duration_ms);
        if let Err(e) = self.store.save(&record) {
            warn!(instance = %id, error = %format!("{e:#}"), "failed to persist instance");
        }
    }
}

/// Releases the run slot if a `run` future is dropped before the unit
/// returns, so the instance never stays claimed forever.
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
    id: InstanceId,
    started: Instant,
    armed: bool,
}

impl<'a> RunGuard<'a> {
    fn new(orchestrator: &'a Orchestrator, id: InstanceId) -> Self {
        Self {
            orchestrator,
            id,
            started: Instant::now(),
            armed: true,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let duration_ms = self.elapsed_ms();
        let err = anyhow::anyhow!("run aborted before the unit finished");
        warn!(instance = %self.id, duration_ms, "run future dropped mid-flight; releasing instance");
        let result = ExecutionResult::failed(&err, duration_ms);
        self.orchestrator.complete_run(&self.id, &result);
        self.orchestrator.sink.publish(OrchestratorEvent::RunFailed {
            instance_id: self.id,
            error: format!("{err:#}"),
            duration_ms,
        });
    }
}
