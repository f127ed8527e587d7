//! Mutable per-run scheduling state.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::workflow::{
    branch::EdgeStates,
    loops::LoopState,
    node::{NodeId, NodeRunStatus},
};

#[derive(Debug, Default)]
pub(crate) struct RunState {
    /// status in the current iteration; absent means pending
    pub statuses: HashMap<NodeId, NodeRunStatus>,
    /// pruned node -> conditional that pruned it; recorded as skipped when the
    /// cursor gets there
    pub pruned: HashMap<NodeId, NodeId>,
    pub edges: EdgeStates,
    /// indexed like `Workflow::regions`
    pub loops: Vec<LoopState>,
    /// last status of every node over the whole run
    pub latest: BTreeMap<NodeId, NodeRunStatus>,
    /// nodes that failed at least once, in failure order
    pub failed: Vec<NodeId>,
}

impl RunState {
    pub fn new(regions: usize) -> Self {
        Self {
            loops: vec![LoopState::default(); regions],
            ..Default::default()
        }
    }

    pub fn status(
        &self,
        id: &str,
    ) -> NodeRunStatus {
        self.statuses.get(id).copied().unwrap_or_default()
    }

    pub fn set(
        &mut self,
        id: &str,
        status: NodeRunStatus,
    ) {
        self.statuses.insert(id.to_string(), status);
        if status != NodeRunStatus::Running {
            self.latest.insert(id.to_string(), status);
        }
        if status == NodeRunStatus::Failed && !self.failed.iter().any(|f| f == id) {
            self.failed.push(id.to_string());
        }
    }

    pub fn is_pruned(
        &self,
        id: &str,
    ) -> bool {
        self.pruned.contains_key(id)
    }

    /// Forgets the current-iteration status of `ids` and the branch decisions
    /// of conditionals among them. Decisions made elsewhere still hold.
    pub fn reset<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a NodeId>,
    ) {
        let ids: HashSet<&str> = ids.into_iter().map(String::as_str).collect();
        self.statuses.retain(|id, _| !ids.contains(id.as_str()));
        self.pruned.retain(|_, by| !ids.contains(by.as_str()));
        self.edges.reset(|by| ids.contains(by));
    }

    pub fn is_running(
        &self,
        id: &str,
    ) -> bool {
        self.status(id) == NodeRunStatus::Running
    }
}
