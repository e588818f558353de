// src/coord/conflict.rs

//! Conflict detection and resolution between instances of the same user.

use serde::Serialize;
use tracing::debug;

use crate::coord::rules::RuleTable;
use crate::registry::InstanceSnapshot;
use crate::types::{InstanceId, InstanceStatus, UnitType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Two instances whose unit types are mutually exclusive.
    InstanceConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A detected conflict. Never persisted; consumed by [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub kind: ConflictKind,
    /// The instance about to run.
    pub candidate: InstanceId,
    /// The running instance it conflicts with.
    pub other: InstanceId,
    pub other_unit: UnitType,
    pub severity: Severity,
}

/// What to do about a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    PauseInstance(InstanceId),
}

/// Scan `peers` (the candidate user's instances) for running instances whose
/// unit type conflicts with the candidate's.
///
/// This is a linear scan over one user's instances; the rule relation may be
/// cyclic and is never traversed transitively.
pub fn find_conflicts(
    candidate: &InstanceSnapshot,
    peers: &[InstanceSnapshot],
    rules: &RuleTable,
) -> Vec<ConflictRecord> {
    peers
        .iter()
        .filter(|other| other.id != candidate.id)
        .filter(|other| other.user_id == candidate.user_id)
        .filter(|other| other.status == InstanceStatus::Running)
        .filter(|other| rules.conflicts_between(&candidate.unit_type, &other.unit_type))
        .map(|other| {
            debug!(
                candidate = %candidate.id,
                unit = %candidate.unit_type,
                other = %other.id,
                other_unit = %other.unit_type,
                "conflict detected"
            );
            ConflictRecord {
                kind: ConflictKind::InstanceConflict,
                candidate: candidate.id,
                other: other.id,
                other_unit: other.unit_type.clone(),
                severity: Severity::Medium,
            }
        })
        .collect()
}

/// Fixed policy: every instance conflict pauses the other instance.
pub fn resolve(conflicts: &[ConflictRecord]) -> Vec<ConflictAction> {
    conflicts
        .iter()
        .map(|c| match c.kind {
            ConflictKind::InstanceConflict => ConflictAction::PauseInstance(c.other),
        })
        .collect()
}
