// src/coord/mod.rs

//! Coordination between instances of the same user.
//!
//! - [`rules`] holds the static per-unit-type rule table.
//! - [`graph`] keeps adjacency for dependency and conflict edges (cycles allowed).
//! - [`conflict`] detects running conflicts and decides what to pause.

pub mod conflict;
pub mod graph;
pub mod rules;

pub use conflict::{find_conflicts, resolve, ConflictAction, ConflictKind, ConflictRecord, Severity};
pub use graph::RuleGraph;
pub use rules::{CoordinationRule, RuleTable, RuleTableBuilder};
