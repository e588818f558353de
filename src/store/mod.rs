// src/store/mod.rs

//! Persistence of instance rows.
//!
//! The orchestrator only issues read/write calls through [`InstanceStore`];
//! where rows live is up to the implementation:
//! - [`MemoryInstanceStore`] keeps them in memory (lost on restart).
//! - [`FileInstanceStore`] keeps a JSON document at
//!   `<root>/.agentvisor/instances.json`.

pub mod file;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::model::StoreSection;
use crate::fs::RealFileSystem;
use crate::registry::InstanceSnapshot;
use crate::types::{InstanceId, InstanceStatus, Settings, StoreMode, UnitType, UserId};

pub use file::{FileInstanceStore, STORE_FILE_PATH};

/// One persisted instance, keyed by (user id, unit type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub user_id: UserId,
    pub unit_type: UnitType,
    pub status: InstanceStatus,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub performance_score: f64,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub avg_duration_ms: f64,
    #[serde(default)]
    pub auto_run_enabled: bool,
    pub auto_run_interval_ms: u64,
    #[serde(default)]
    pub settings: Settings,
    pub created_at: DateTime<Utc>,
}

impl InstanceRecord {
    pub fn from_snapshot(snapshot: &InstanceSnapshot, total_runs: u64, avg_duration_ms: f64) -> Self {
        Self {
            instance_id: snapshot.id,
            user_id: snapshot.user_id.clone(),
            unit_type: snapshot.unit_type.clone(),
            status: snapshot.status,
            last_run: snapshot.last_run,
            performance_score: snapshot.performance_score,
            total_runs,
            avg_duration_ms,
            auto_run_enabled: snapshot.auto_run_enabled,
            auto_run_interval_ms: u64::try_from(snapshot.auto_run_interval.as_millis())
                .unwrap_or(u64::MAX),
            settings: snapshot.settings.clone(),
            created_at: snapshot.created_at,
        }
    }

    pub fn auto_run_interval(&self) -> Duration {
        Duration::from_millis(self.auto_run_interval_ms)
    }

    pub fn key(&self) -> (UserId, UnitType) {
        (self.user_id.clone(), self.unit_type.clone())
    }
}

/// Abstract storage for instance rows.
///
/// Calls are synchronous and made from async code; implementations should
/// return quickly.
pub trait InstanceStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<InstanceRecord>>;
    /// Insert or replace the row for (user id, unit type).
    fn save(&self, record: &InstanceRecord) -> Result<()>;
    fn remove(&self, user_id: &str, unit_type: &str) -> Result<()>;
}

/// Stores rows in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryInstanceStore {
    rows: Arc<Mutex<BTreeMap<(UserId, UnitType), InstanceRecord>>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing rows (e.g. to simulate a restart).
    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = InstanceRecord>,
    {
        let store = Self::new();
        {
            let mut rows = store.rows();
            for r in records {
                rows.insert(r.key(), r);
            }
        }
        store
    }

    fn rows(&self) -> MutexGuard<'_, BTreeMap<(UserId, UnitType), InstanceRecord>> {
        self.rows.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn get(&self, user_id: &str, unit_type: &str) -> Option<InstanceRecord> {
        self.rows()
            .get(&(user_id.to_string(), unit_type.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstanceStore for MemoryInstanceStore {
    fn load_all(&self) -> Result<Vec<InstanceRecord>> {
        Ok(self.rows().values().cloned().collect())
    }

    fn save(&self, record: &InstanceRecord) -> Result<()> {
        self.rows().insert(record.key(), record.clone());
        debug!(instance = %record.instance_id, status = %record.status, "stored instance (memory)");
        Ok(())
    }

    fn remove(&self, user_id: &str, unit_type: &str) -> Result<()> {
        if self
            .rows()
            .remove(&(user_id.to_string(), unit_type.to_string()))
            .is_some()
        {
            info!(user = %user_id, unit = %unit_type, "removed instance row (memory)");
        }
        Ok(())
    }
}

/// Build the store selected by a `[store]` section.
pub fn open_store(section: &StoreSection) -> Arc<dyn InstanceStore> {
    match section.mode {
        StoreMode::Memory => Arc::new(MemoryInstanceStore::new()),
        StoreMode::File => Arc::new(FileInstanceStore::new(
            Arc::new(RealFileSystem),
            section.path.clone(),
        )),
    }
}
