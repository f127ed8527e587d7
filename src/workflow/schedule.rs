//! Deterministic execution order.
//!
//! Kahn's algorithm over the dependency set; among simultaneously eligible
//! nodes the lexicographically smallest id goes first. When no complete
//! order exists the declared node order is used instead, so a graph is never
//! refused. That fallback may run nodes before their dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::workflow::{dependency::DependencySet, node::NodeId, normalize::NormalizedGraph};

/// Outcome of scheduling. Both variants are runnable plans.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", content = "order", rename_all = "snake_case")]
pub enum Schedule {
    /// a topological order consistent with every dependency
    Ordered(Vec<NodeId>),
    /// dependencies are cyclic or inconsistent; declaration order
    Fallback(Vec<NodeId>),
}

impl Schedule {
    pub fn order(&self) -> &[NodeId] {
        match self {
            Schedule::Ordered(order) | Schedule::Fallback(order) => order,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Schedule::Fallback(_))
    }
}

pub fn schedule(
    graph: &NormalizedGraph,
    deps: &DependencySet,
) -> Schedule {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in &graph.node_ids {
        let node_deps = deps.get(id);
        // unknown dependencies still count, they can never be satisfied
        in_degree.insert(id.as_str(), node_deps.map(BTreeSet::len).unwrap_or(0));
        for dep in node_deps.into_iter().flatten() {
            if graph.contains(dep) {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }
    }

    let mut ready: BTreeSet<&str> = in_degree.iter().filter(|(_, degree)| **degree == 0).map(|(id, _)| *id).collect();
    let mut order: Vec<NodeId> = Vec::with_capacity(graph.node_ids.len());

    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if order.len() < graph.node_ids.len() {
        warn!(
            "dependency graph has a cycle or unknown dependency ({} of {} nodes ordered), falling back to declaration order",
            order.len(),
            graph.node_ids.len()
        );
        return Schedule::Fallback(graph.declared_order.clone());
    }

    debug!("execution order: {:?}", order);
    Schedule::Ordered(order)
}

/// A schedule plus position lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    schedule: Schedule,
    positions: HashMap<NodeId, usize>,
}

impl ExecutionPlan {
    pub fn new(schedule: Schedule) -> Self {
        let positions = schedule.order().iter().enumerate().map(|(pos, id)| (id.clone(), pos)).collect();
        Self {
            schedule,
            positions,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn order(&self) -> &[NodeId] {
        self.schedule.order()
    }

    pub fn len(&self) -> usize {
        self.order().len()
    }

    pub fn is_empty(&self) -> bool {
        self.order().is_empty()
    }

    pub fn position(
        &self,
        id: &str,
    ) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn get(
        &self,
        pos: usize,
    ) -> Option<&NodeId> {
        self.order().get(pos)
    }
}
