// src/exec/mod.rs

//! Execution units.
//!
//! - [`unit`] defines the `ExecutionUnit` trait every unit implements, plus
//!   the context handed to an invocation and the result it produces.
//! - [`command`] runs a shell command with `tokio::process::Command`.
//! - [`builtin`] holds the echo unit and maps config `kind`s to units.

pub mod builtin;
pub mod command;
pub mod unit;

pub use builtin::{unit_for_kind, EchoUnit};
pub use command::CommandUnit;
pub use unit::{ExecutionContext, ExecutionResult, ExecutionUnit, UnitDefinition, UnitFuture};
