// src/coord/rules.rs

//! Static coordination rules per unit type.

use std::collections::{BTreeSet, HashMap};

use crate::config::model::{ConfigFile, DEFAULT_PRIORITY};
use crate::coord::graph::RuleGraph;
use crate::types::UnitType;

/// Dependency / conflict / priority metadata for one unit type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationRule {
    /// Ordering hint only; never enforced as a gate.
    pub depends_on: BTreeSet<UnitType>,
    /// Unit types that must not be running for the same user at the same time.
    pub conflicts_with: BTreeSet<UnitType>,
    /// Lower runs first when several instances are eligible in one tick.
    pub priority: i32,
}

impl Default for CoordinationRule {
    fn default() -> Self {
        Self {
            depends_on: BTreeSet::new(),
            conflicts_with: BTreeSet::new(),
            priority: DEFAULT_PRIORITY,
        }
    }
}

impl CoordinationRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends_on(mut self, unit: impl Into<UnitType>) -> Self {
        self.depends_on.insert(unit.into());
        self
    }

    pub fn conflicts_with(mut self, unit: impl Into<UnitType>) -> Self {
        self.conflicts_with.insert(unit.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Read-only rule table, built once at startup.
///
/// Lookups for unit types without a rule return an empty default rule rather
/// than failing, so coordination keeps working for units registered later or
/// outside the config catalog.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: HashMap<UnitType, CoordinationRule>,
    graph: RuleGraph,
    symmetric: bool,
    empty: CoordinationRule,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RuleTable {
    pub fn builder() -> RuleTableBuilder {
        RuleTableBuilder {
            rules: HashMap::new(),
            symmetric: true,
        }
    }

    /// Build the table from the `[unit.<name>]` sections of a validated config.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut builder =
            Self::builder().symmetric_conflicts(cfg.orchestrator.symmetric_conflicts);

        for (name, unit) in cfg.unit.iter() {
            let rule = CoordinationRule {
                depends_on: unit.depends_on.iter().cloned().collect(),
                conflicts_with: unit.conflicts.iter().cloned().collect(),
                priority: unit.effective_priority(),
            };
            builder = builder.rule(name.clone(), rule);
        }

        builder.build()
    }

    pub fn rules_for(&self, unit_type: &str) -> &CoordinationRule {
        self.rules.get(unit_type).unwrap_or(&self.empty)
    }

    pub fn priority_of(&self, unit_type: &str) -> i32 {
        self.rules_for(unit_type).priority
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    /// Whether an instance of `candidate` must not run alongside a running
    /// instance of `other` for the same user.
    pub fn conflicts_between(&self, candidate: &str, other: &str) -> bool {
        if self.rules_for(candidate).conflicts_with.contains(other) {
            return true;
        }
        self.symmetric && self.rules_for(other).conflicts_with.contains(candidate)
    }

    pub fn dependencies_of(&self, unit_type: &str) -> &[String] {
        self.graph.dependencies_of(unit_type)
    }

    pub fn dependents_of(&self, unit_type: &str) -> &[String] {
        self.graph.dependents_of(unit_type)
    }

    pub fn graph(&self) -> &RuleGraph {
        &self.graph
    }
}

/// Programmatic construction of a [`RuleTable`].
#[derive(Debug)]
pub struct RuleTableBuilder {
    rules: HashMap<UnitType, CoordinationRule>,
    symmetric: bool,
}

impl RuleTableBuilder {
    pub fn rule(mut self, unit_type: impl Into<UnitType>, rule: CoordinationRule) -> Self {
        self.rules.insert(unit_type.into(), rule);
        self
    }

    pub fn symmetric_conflicts(mut self, symmetric: bool) -> Self {
        self.symmetric = symmetric;
        self
    }

    pub fn build(self) -> RuleTable {
        let graph = RuleGraph::from_rules(self.rules.iter());
        RuleTable {
            rules: self.rules,
            graph,
            symmetric: self.symmetric,
            empty: CoordinationRule::default(),
        }
    }
}
