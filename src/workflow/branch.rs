//! Conditional routing.
//!
//! After a conditional node resolves, the edges leaving it through the other
//! branch port are skipped. A node is pruned once every incoming edge it has
//! is skipped, and pruning cascades along its own outgoing edges. A node that
//! still has a live incoming edge (the graph re-converges) stays eligible.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::workflow::{
    consts::{COND_FALSE_PORT, COND_TRUE_PORT},
    dependency::IncomingIndex,
    edge::{Edge, EdgeId},
    node::NodeId,
};

/// Port label selected by a condition result.
pub fn select_port(result: bool) -> &'static str {
    if result { COND_TRUE_PORT } else { COND_FALSE_PORT }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EdgeState {
    #[default]
    Pending,
    Taken,
    Skipped,
}

/// Per-run edge states, keyed by edge id. Each decision remembers the
/// conditional that made it.
#[derive(Debug, Clone, Default)]
pub struct EdgeStates {
    states: HashMap<EdgeId, (EdgeState, NodeId)>,
}

impl EdgeStates {
    pub fn get(
        &self,
        id: &str,
    ) -> EdgeState {
        self.states.get(id).map(|(state, _)| *state).unwrap_or_default()
    }

    pub fn set(
        &mut self,
        id: &str,
        state: EdgeState,
        decided_by: &str,
    ) {
        self.states.insert(id.to_string(), (state, decided_by.to_string()));
    }

    /// Forgets every decision made by a conditional matching `decided_by`.
    pub fn reset<F>(
        &mut self,
        decided_by: F,
    ) where
        F: Fn(&str) -> bool,
    {
        self.states.retain(|_, (_, conditional)| !decided_by(conditional.as_str()));
    }
}

/// Marks the branches of `conditional` and prunes what only the unselected
/// branch reaches. `is_pending` reports whether a node has not started yet;
/// nodes that already ran are never pruned.
///
/// Returns the pruned node ids in discovery order.
pub fn prune_unselected<F>(
    conditional: &str,
    selected: &str,
    outgoing: &BTreeMap<NodeId, Vec<Edge>>,
    incoming: &IncomingIndex,
    states: &mut EdgeStates,
    is_pending: F,
) -> Vec<NodeId>
where
    F: Fn(&str) -> bool,
{
    let mut to_process: Vec<&Edge> = Vec::new();
    for edge in outgoing.get(conditional).into_iter().flatten() {
        if !edge.is_branch() {
            continue;
        }
        if edge.source_port.as_deref() == Some(selected) {
            states.set(&edge.id, EdgeState::Taken, conditional);
        } else {
            to_process.push(edge);
        }
    }

    let mut pruned: Vec<NodeId> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    // depth first, reversed so the first edge is handled first
    to_process.reverse();
    while let Some(edge) = to_process.pop() {
        if states.get(&edge.id) == EdgeState::Skipped {
            continue;
        }
        states.set(&edge.id, EdgeState::Skipped, conditional);

        let target = edge.target.as_str();
        if seen.contains(target) || !is_pending(target) {
            continue;
        }
        let all_skipped = incoming.get(target).into_iter().flatten().all(|e| states.get(&e.id) == EdgeState::Skipped);
        if all_skipped {
            seen.insert(target);
            pruned.push(target.to_string());
            let mut next: Vec<&Edge> = outgoing.get(target).into_iter().flatten().collect();
            next.reverse();
            to_process.extend(next);
        }
    }

    debug!("conditional {} selected {}, pruned {:?}", conditional, selected, pruned);
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::dependency::{incoming_index, outgoing_index};

    fn edge(
        source: &str,
        target: &str,
        port: Option<&str>,
    ) -> Edge {
        Edge::new(None, source, target, port.map(str::to_string), None)
    }

    fn prune(
        edges: &[Edge],
        selected: bool,
    ) -> (Vec<NodeId>, EdgeStates) {
        let mut states = EdgeStates::default();
        let pruned = prune_unselected("c", select_port(selected), &outgoing_index(edges), &incoming_index(edges), &mut states, |_| true);
        (pruned, states)
    }

    #[test]
    fn test_select_port() {
        assert_eq!(select_port(true), "cond-true");
        assert_eq!(select_port(false), "cond-false");
    }

    #[test]
    fn test_unselected_branch_is_pruned() {
        let edges = vec![
            edge("c", "yes", Some(COND_TRUE_PORT)),
            edge("c", "no", Some(COND_FALSE_PORT)),
            edge("no", "no-2", None),
        ];
        let (pruned, states) = prune(&edges, true);
        assert_eq!(pruned, vec!["no", "no-2"]);
        assert_eq!(states.get(&edges[0].id), EdgeState::Taken);
        assert_eq!(states.get(&edges[1].id), EdgeState::Skipped);
        assert_eq!(states.get(&edges[2].id), EdgeState::Skipped);
    }

    #[test]
    fn test_reconverging_node_stays_eligible() {
        let edges = vec![
            edge("c", "yes", Some(COND_TRUE_PORT)),
            edge("c", "no", Some(COND_FALSE_PORT)),
            edge("yes", "join", None),
            edge("no", "join", None),
        ];
        let (pruned, _) = prune(&edges, true);
        assert_eq!(pruned, vec!["no"]);

        let (pruned, _) = prune(&edges, false);
        assert_eq!(pruned, vec!["yes"]);
    }

    #[test]
    fn test_other_incoming_path_keeps_node() {
        let edges = vec![edge("c", "x", Some(COND_FALSE_PORT)), edge("other", "x", None)];
        let (pruned, _) = prune(&edges, true);
        assert!(pruned.is_empty());
    }

    #[test]
    fn test_unconditional_outputs_untouched() {
        let edges = vec![edge("c", "always", None), edge("c", "x", Some(COND_FALSE_PORT))];
        let (pruned, states) = prune(&edges, true);
        assert_eq!(pruned, vec!["x"]);
        assert_eq!(states.get(&edges[0].id), EdgeState::Pending);
    }

    #[test]
    fn test_started_nodes_are_not_pruned() {
        let edges = vec![edge("c", "x", Some(COND_FALSE_PORT)), edge("x", "y", None)];
        let mut states = EdgeStates::default();
        let pruned = prune_unselected("c", COND_TRUE_PORT, &outgoing_index(&edges), &incoming_index(&edges), &mut states, |id| id != "x");
        assert!(pruned.is_empty());
    }

    #[test]
    fn test_reset() {
        let edges = vec![edge("c", "x", Some(COND_FALSE_PORT))];
        let (_, mut states) = prune(&edges, true);
        states.set("other", EdgeState::Skipped, "outer");
        states.reset(|conditional| conditional == "c");
        assert_eq!(states.get(&edges[0].id), EdgeState::Pending);
        assert_eq!(states.get("other"), EdgeState::Skipped);
    }
}
