// src/config/mod.rs

//! Configuration loading and validation for agentvisor.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] reads a config file from disk.
//! - [`validate`] checks durations, rules and seed instances.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, InstanceSeed, OrchestratorSection, RawConfigFile, StoreSection, UnitConfig,
    DEFAULT_PRIORITY,
};
pub use validate::validate_config;
