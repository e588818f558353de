// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{OrchestratorError, Result};
use crate::types::{parse_duration, Settings, StoreMode, UnitKind};

/// Default scheduler tick.
pub const DEFAULT_TICK_INTERVAL: &str = "60s";

/// Default auto-run interval for instances that do not set their own.
pub const DEFAULT_AUTO_RUN_INTERVAL: &str = "30m";

/// Priority given to units that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Raw configuration as read from a TOML file.
///
/// ```toml
/// [orchestrator]
/// tick_interval = "60s"
///
/// [unit.meeting]
/// kind = "command"
/// conflicts = ["router"]
/// [unit.meeting.config]
/// cmd = "./sync-calendar.sh"
///
/// [[instance]]
/// user = "u1"
/// unit = "meeting"
/// auto_run = true
/// ```
///
/// Use [`ConfigFile::try_from`] (or `config::load_and_validate`) to obtain a
/// validated [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,

    #[serde(default)]
    pub store: StoreSection,

    /// Unit catalog from `[unit.<name>]`, keyed by unit type.
    #[serde(default)]
    pub unit: BTreeMap<String, UnitConfig>,

    /// Instances to create at startup from `[[instance]]`.
    #[serde(default)]
    pub instance: Vec<InstanceSeed>,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so every duration string
/// and unit reference in here has already been checked.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub orchestrator: OrchestratorSection,
    pub store: StoreSection,
    pub unit: BTreeMap<String, UnitConfig>,
    pub instance: Vec<InstanceSeed>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            orchestrator: raw.orchestrator,
            store: raw.store,
            unit: raw.unit,
            instance: raw.instance,
        }
    }
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    /// How often the scheduler looks for due instances.
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    /// Auto-run interval for instances that don't specify one.
    #[serde(default = "default_auto_run_interval")]
    pub default_auto_run_interval: String,

    /// If true, a conflict declared by either unit blocks both; if false only
    /// the candidate's own `conflicts` list is consulted.
    #[serde(default = "default_symmetric_conflicts")]
    pub symmetric_conflicts: bool,
}

fn default_tick_interval() -> String {
    DEFAULT_TICK_INTERVAL.to_string()
}

fn default_auto_run_interval() -> String {
    DEFAULT_AUTO_RUN_INTERVAL.to_string()
}

fn default_symmetric_conflicts() -> bool {
    true
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            default_auto_run_interval: default_auto_run_interval(),
            symmetric_conflicts: default_symmetric_conflicts(),
        }
    }
}

impl OrchestratorSection {
    pub fn tick_interval(&self) -> Result<Duration> {
        parse_config_duration("[orchestrator].tick_interval", &self.tick_interval)
    }

    pub fn default_auto_run_interval(&self) -> Result<Duration> {
        parse_config_duration(
            "[orchestrator].default_auto_run_interval",
            &self.default_auto_run_interval,
        )
    }
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub mode: StoreMode,

    /// Root directory for the file store.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            mode: StoreMode::default(),
            path: default_store_path(),
        }
    }
}

/// `[unit.<name>]` section: one catalog entry plus its coordination rule.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub kind: UnitKind,

    /// Lower runs first when several instances are due in the same tick.
    #[serde(default)]
    pub priority: Option<i32>,

    /// Unit types this one should run after. Informational only.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Unit types that must not run for the same user at the same time.
    #[serde(default)]
    pub conflicts: Vec<String>,

    /// Default configuration handed to every instance of this unit.
    #[serde(default)]
    pub config: Settings,
}

impl UnitConfig {
    pub fn effective_priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }
}

/// `[[instance]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSeed {
    pub user: String,
    pub unit: String,

    #[serde(default)]
    pub auto_run: bool,

    /// Falls back to `[orchestrator].default_auto_run_interval`.
    #[serde(default)]
    pub auto_run_interval: Option<String>,

    #[serde(default)]
    pub settings: Settings,
}

impl InstanceSeed {
    pub fn effective_auto_run_interval(&self, default: Duration) -> Result<Duration> {
        match self.auto_run_interval {
            Some(ref s) => parse_config_duration(
                &format!("auto_run_interval of instance {}/{}", self.user, self.unit),
                s,
            ),
            None => Ok(default),
        }
    }
}

fn parse_config_duration(what: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| OrchestratorError::ConfigError(format!("{what}: {e}")))
}
