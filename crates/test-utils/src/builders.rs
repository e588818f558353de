#![allow(dead_code)]

use std::collections::BTreeMap;

use agentvisor::config::{ConfigFile, InstanceSeed, OrchestratorSection, RawConfigFile, StoreSection, UnitConfig};
use agentvisor::types::{Settings, UnitKind};
use serde_json::Value;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                orchestrator: OrchestratorSection::default(),
                store: StoreSection::default(),
                unit: BTreeMap::new(),
                instance: Vec::new(),
            },
        }
    }

    pub fn with_unit(mut self, name: &str, unit: UnitConfig) -> Self {
        self.config.unit.insert(name.to_string(), unit);
        self
    }

    pub fn with_instance(mut self, seed: InstanceSeed) -> Self {
        self.config.instance.push(seed);
        self
    }

    pub fn with_tick_interval(mut self, value: &str) -> Self {
        self.config.orchestrator.tick_interval = value.to_string();
        self
    }

    pub fn with_symmetric_conflicts(mut self, symmetric: bool) -> Self {
        self.config.orchestrator.symmetric_conflicts = symmetric;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `[unit.<name>]` section. Defaults to an echo unit.
pub struct UnitConfigBuilder {
    unit: UnitConfig,
}

impl UnitConfigBuilder {
    pub fn echo() -> Self {
        Self {
            unit: UnitConfig {
                kind: UnitKind::Echo,
                priority: None,
                depends_on: Vec::new(),
                conflicts: Vec::new(),
                config: Settings::new(),
            },
        }
    }

    pub fn command(cmd: &str) -> Self {
        let mut b = Self::echo();
        b.unit.kind = UnitKind::Command;
        b.unit.config.insert("cmd".to_string(), Value::String(cmd.to_string()));
        b
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.unit.priority = Some(priority);
        self
    }

    pub fn depends_on(mut self, unit: &str) -> Self {
        self.unit.depends_on.push(unit.to_string());
        self
    }

    pub fn conflicts(mut self, unit: &str) -> Self {
        self.unit.conflicts.push(unit.to_string());
        self
    }

    pub fn config(mut self, key: &str, value: Value) -> Self {
        self.unit.config.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> UnitConfig {
        self.unit
    }
}

/// Shorthand for an `[[instance]]` entry.
pub fn seed(user: &str, unit: &str) -> InstanceSeed {
    InstanceSeed {
        user: user.to_string(),
        unit: unit.to_string(),
        auto_run: false,
        auto_run_interval: None,
        settings: Settings::new(),
    }
}

/// Shorthand for an auto-run `[[instance]]` entry.
pub fn auto_seed(user: &str, unit: &str, interval: &str) -> InstanceSeed {
    InstanceSeed {
        auto_run: true,
        auto_run_interval: Some(interval.to_string()),
        ..seed(user, unit)
    }
}
