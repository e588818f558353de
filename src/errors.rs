// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::types::{InstanceId, UnitType, UserId};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown unit type: {0}")]
    UnknownUnitType(UnitType),

    #[error("Unit type already registered: {0}")]
    DuplicateUnitType(UnitType),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Instance already exists for user '{user_id}' and unit '{unit_type}' ({existing})")]
    AlreadyExists {
        user_id: UserId,
        unit_type: UnitType,
        existing: InstanceId,
    },

    #[error("Instance {0} is already running")]
    AlreadyRunning(InstanceId),

    #[error("Instance {0} is paused; resume it before running")]
    InstancePaused(InstanceId),

    #[error("Execution failed for instance {instance_id}: {source}")]
    ExecutionFailed {
        instance_id: InstanceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, OrchestratorError>;
