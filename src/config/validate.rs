// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use tracing::warn;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{OrchestratorError, Result};
use crate::types::UnitKind;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = OrchestratorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

/// Run every semantic check on a raw config.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_units(cfg)?;
    validate_orchestrator_section(cfg)?;
    validate_units(cfg)?;
    validate_instances(cfg)?;
    Ok(())
}

fn ensure_has_units(cfg: &RawConfigFile) -> Result<()> {
    if cfg.unit.is_empty() {
        return Err(OrchestratorError::ConfigError(
            "config must contain at least one [unit.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_orchestrator_section(cfg: &RawConfigFile) -> Result<()> {
    let tick = cfg.orchestrator.tick_interval()?;
    if tick == Duration::ZERO {
        return Err(OrchestratorError::ConfigError(
            "[orchestrator].tick_interval must be greater than zero".to_string(),
        ));
    }

    let interval = cfg.orchestrator.default_auto_run_interval()?;
    if interval == Duration::ZERO {
        return Err(OrchestratorError::ConfigError(
            "[orchestrator].default_auto_run_interval must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_units(cfg: &RawConfigFile) -> Result<()> {
    for (name, unit) in cfg.unit.iter() {
        if unit.conflicts.iter().any(|c| c == name) {
            return Err(OrchestratorError::ConfigError(format!(
                "unit '{}' cannot conflict with itself",
                name
            )));
        }
        if unit.depends_on.iter().any(|d| d == name) {
            return Err(OrchestratorError::ConfigError(format!(
                "unit '{}' cannot depend on itself",
                name
            )));
        }

        // Rules may name unit types that are not in this catalog (they can be
        // registered programmatically), so this is only worth a warning.
        for other in unit.conflicts.iter().chain(unit.depends_on.iter()) {
            if !cfg.unit.contains_key(other) {
                warn!(unit = %name, other = %other, "rule references a unit type missing from the catalog");
            }
        }

        if unit.kind == UnitKind::Command {
            match unit.config.get("cmd") {
                Some(serde_json::Value::String(cmd)) if !cmd.trim().is_empty() => {}
                _ => {
                    return Err(OrchestratorError::ConfigError(format!(
                        "unit '{}' has kind = \"command\" but no non-empty `config.cmd` string",
                        name
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_instances(cfg: &RawConfigFile) -> Result<()> {
    let default_interval = cfg.orchestrator.default_auto_run_interval()?;
    let mut seen: HashSet<(&str, &str)> = HashSet::new();

    for seed in cfg.instance.iter() {
        if seed.user.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(format!(
                "[[instance]] for unit '{}' has an empty user",
                seed.unit
            )));
        }
        if !cfg.unit.contains_key(&seed.unit) {
            return Err(OrchestratorError::ConfigError(format!(
                "[[instance]] for user '{}' references unknown unit '{}'",
                seed.user, seed.unit
            )));
        }
        if !seen.insert((seed.user.as_str(), seed.unit.as_str())) {
            return Err(OrchestratorError::ConfigError(format!(
                "duplicate [[instance]] for user '{}' and unit '{}'",
                seed.user, seed.unit
            )));
        }

        let interval = seed.effective_auto_run_interval(default_interval)?;
        if seed.auto_run && interval == Duration::ZERO {
            return Err(OrchestratorError::ConfigError(format!(
                "instance {}/{} has auto_run enabled with a zero interval",
                seed.user, seed.unit
            )));
        }
    }
    Ok(())
}
