// tests/conflict_property.rs

use chrono::Utc;
use proptest::prelude::*;

use agentvisor::coord::{find_conflicts, resolve, ConflictAction, CoordinationRule, RuleTable};
use agentvisor::registry::InstanceSnapshot;
use agentvisor::types::{InstanceId, InstanceStatus, Settings};

const UNITS: [&str; 5] = ["meeting", "router", "email", "digest", "notes"];
const USERS: [&str; 3] = ["u1", "u2", "u3"];

fn status_strategy() -> impl Strategy<Value = InstanceStatus> {
    prop_oneof![
        Just(InstanceStatus::Idle),
        Just(InstanceStatus::Running),
        Just(InstanceStatus::Paused),
        Just(InstanceStatus::Error),
    ]
}

// Rules: for each unit, a bitmask of which other units it conflicts with.
fn rules_strategy() -> impl Strategy<Value = (Vec<u8>, bool)> {
    (proptest::collection::vec(any::<u8>(), UNITS.len()), any::<bool>())
}

fn build_rules(masks: &[u8], symmetric: bool) -> RuleTable {
    let mut builder = RuleTable::builder().symmetric_conflicts(symmetric);
    for (i, mask) in masks.iter().enumerate() {
        let mut rule = CoordinationRule::new();
        for (j, other) in UNITS.iter().enumerate() {
            if i != j && mask & (1 << j) != 0 {
                rule = rule.conflicts_with(*other);
            }
        }
        builder = builder.rule(UNITS[i], rule);
    }
    builder.build()
}

fn peers_strategy() -> impl Strategy<Value = Vec<(usize, usize, InstanceStatus)>> {
    proptest::collection::vec((0..USERS.len(), 0..UNITS.len(), status_strategy()), 0..12)
}

fn snapshot(user: usize, unit: usize, status: InstanceStatus) -> InstanceSnapshot {
    InstanceSnapshot {
        id: InstanceId::new(),
        user_id: USERS[user].to_string(),
        unit_type: UNITS[unit].to_string(),
        status,
        settings: Settings::new(),
        auto_run_enabled: false,
        auto_run_interval: std::time::Duration::from_secs(60),
        last_run: None,
        performance_score: 0.0,
        created_at: Utc::now(),
        in_flight: status == InstanceStatus::Running,
    }
}

proptest! {
    #[test]
    fn conflicts_only_target_running_same_user_rule_matches(
        (masks, symmetric) in rules_strategy(),
        candidate_unit in 0..UNITS.len(),
        raw_peers in peers_strategy(),
    ) {
        let rules = build_rules(&masks, symmetric);
        let candidate = snapshot(0, candidate_unit, InstanceStatus::Running);
        let mut peers: Vec<InstanceSnapshot> = raw_peers
            .into_iter()
            .map(|(user, unit, status)| snapshot(user, unit, status))
            .collect();
        peers.push(candidate.clone());

        let conflicts = find_conflicts(&candidate, &peers, &rules);

        for c in &conflicts {
            let other = peers.iter().find(|p| p.id == c.other).expect("conflict names a peer");
            prop_assert_ne!(other.id, candidate.id);
            prop_assert_eq!(&other.user_id, &candidate.user_id);
            prop_assert_eq!(other.status, InstanceStatus::Running);
            prop_assert!(rules.conflicts_between(&candidate.unit_type, &other.unit_type));
            prop_assert_eq!(c.candidate, candidate.id);
        }

        // Completeness: every eligible peer is reported.
        let expected = peers
            .iter()
            .filter(|p| p.id != candidate.id
                && p.user_id == candidate.user_id
                && p.status == InstanceStatus::Running
                && rules.conflicts_between(&candidate.unit_type, &p.unit_type))
            .count();
        prop_assert_eq!(conflicts.len(), expected);

        // Resolution always pauses the other side, never the candidate.
        let actions = resolve(&conflicts);
        prop_assert_eq!(actions.len(), conflicts.len());
        for action in actions {
            let ConflictAction::PauseInstance(target) = action;
            prop_assert_ne!(target, candidate.id);
        }
    }

    #[test]
    fn symmetric_relation_is_symmetric((masks, _) in rules_strategy(), a in 0..UNITS.len(), b in 0..UNITS.len()) {
        let rules = build_rules(&masks, true);
        prop_assert_eq!(
            rules.conflicts_between(UNITS[a], UNITS[b]),
            rules.conflicts_between(UNITS[b], UNITS[a])
        );
    }
}
