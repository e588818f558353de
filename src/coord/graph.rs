// src/coord/graph.rs

use std::collections::BTreeMap;

use crate::coord::rules::CoordinationRule;

/// Internal node structure: immediate edges in both directions.
#[derive(Debug, Clone, Default)]
struct RuleNode {
    /// Unit types this one declares it depends on.
    deps: Vec<String>,
    /// Unit types that declare a dependency on this one.
    dependents: Vec<String>,
    /// Unit types this one declares a conflict with.
    conflicts: Vec<String>,
    /// Unit types that declare a conflict with this one.
    conflicted_by: Vec<String>,
}

/// Adjacency view over the coordination rules.
///
/// Unlike a task DAG this relation may contain cycles (`A` depends on `B`
/// and `B` on `A`, or mutual conflicts), so nothing here sorts or walks the
/// graph transitively. Unit types that are only referenced by another rule
/// still get a node, which keeps lookups total.
#[derive(Debug, Clone, Default)]
pub struct RuleGraph {
    nodes: BTreeMap<String, RuleNode>,
}

impl RuleGraph {
    pub fn from_rules<'a, I>(rules: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a CoordinationRule)>,
    {
        let mut nodes: BTreeMap<String, RuleNode> = BTreeMap::new();

        for (name, rule) in rules {
            {
                let node = nodes.entry(name.clone()).or_default();
                node.deps = rule.depends_on.iter().cloned().collect();
                node.conflicts = rule.conflicts_with.iter().cloned().collect();
            }

            for dep in rule.depends_on.iter() {
                nodes
                    .entry(dep.clone())
                    .or_default()
                    .dependents
                    .push(name.clone());
            }
            for other in rule.conflicts_with.iter() {
                nodes
                    .entry(other.clone())
                    .or_default()
                    .conflicted_by
                    .push(name.clone());
            }
        }

        Self { nodes }
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn conflicts_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.conflicts.as_slice())
            .unwrap_or(&[])
    }

    /// Unit types whose own rule lists `name` as a conflict.
    pub fn conflicted_by(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.conflicted_by.as_slice())
            .unwrap_or(&[])
    }
}
