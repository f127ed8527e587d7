//! Dependency inference.
//!
//! A node depends on the sources of its incoming edges and on every node its
//! prompt references through `{{nodes.<id>}}` / `{{steps.<id>}}`. Both kinds
//! are hard ordering constraints.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::{
    algo::has_path_connecting,
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, Reversed},
};

use crate::{
    model::GraphModel,
    workflow::{
        edge::Edge,
        node::{NodeId, usable_id},
        normalize::NormalizedGraph,
        template,
    },
};

/// node id -> ids it must wait for
pub type DependencySet = BTreeMap<NodeId, BTreeSet<NodeId>>;

/// target node id -> edges pointing at it, sorted by edge id
pub type IncomingIndex = BTreeMap<NodeId, Vec<Edge>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub depends_on: DependencySet,
    pub incoming: IncomingIndex,
}

impl Dependencies {
    pub fn of(
        &self,
        id: &str,
    ) -> impl Iterator<Item = &NodeId> {
        self.depends_on.get(id).into_iter().flatten()
    }
}

pub fn incoming_index(edges: &[Edge]) -> IncomingIndex {
    let mut incoming: IncomingIndex = BTreeMap::new();
    for edge in edges {
        incoming.entry(edge.target.clone()).or_default().push(edge.clone());
    }
    for list in incoming.values_mut() {
        list.sort_by(|a, b| a.id.cmp(&b.id));
    }
    incoming
}

/// source node id -> edges leaving it, sorted by edge id
pub fn outgoing_index(edges: &[Edge]) -> BTreeMap<NodeId, Vec<Edge>> {
    let mut outgoing: BTreeMap<NodeId, Vec<Edge>> = BTreeMap::new();
    for edge in edges {
        outgoing.entry(edge.source.clone()).or_default().push(edge.clone());
    }
    outgoing
}

/// Directed view of a dependency set, edges run from a dependency to its
/// dependent.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<NodeId, ()>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    pub fn new(
        node_ids: &[NodeId],
        deps: &DependencySet,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for id in node_ids {
            indices.entry(id.clone()).or_insert_with(|| graph.add_node(id.clone()));
        }
        for (id, node_deps) in deps {
            let Some(target) = indices.get(id) else {
                continue;
            };
            for dep in node_deps {
                if let Some(source) = indices.get(dep) {
                    graph.add_edge(*source, *target, ());
                }
            }
        }
        Self { graph, indices }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether `to` depends on `from`, directly or transitively.
    pub fn reaches(
        &self,
        from: &str,
        to: &str,
    ) -> bool {
        match (self.indices.get(from), self.indices.get(to)) {
            (Some(a), Some(b)) if a != b => has_path_connecting(&self.graph, *a, *b, None),
            _ => false,
        }
    }

    /// Every node that depends on `id`, directly or transitively.
    pub fn downstream(
        &self,
        id: &str,
    ) -> BTreeSet<NodeId> {
        let Some(start) = self.indices.get(id) else {
            return BTreeSet::new();
        };
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, *start);
        while let Some(idx) = dfs.next(&self.graph) {
            if idx != *start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }

    /// Every node `id` depends on, directly or transitively.
    pub fn upstream(
        &self,
        id: &str,
    ) -> BTreeSet<NodeId> {
        let Some(start) = self.indices.get(id) else {
            return BTreeSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut found = BTreeSet::new();
        let mut dfs = Dfs::new(reversed, *start);
        while let Some(idx) = dfs.next(reversed) {
            if idx != *start {
                found.insert(self.graph[idx].clone());
            }
        }
        found
    }
}

/// Builds the dependency set of every usable node of `model`.
///
/// Prompts are taken from the first declaration of each id, matching
/// normalization. Template references to unknown ids or to the node itself
/// are ignored.
pub fn resolve_dependencies(
    model: &GraphModel,
    graph: &NormalizedGraph,
) -> Dependencies {
    let incoming = incoming_index(&graph.edges);

    let mut prompts: BTreeMap<&str, &str> = BTreeMap::new();
    for node in &model.nodes {
        if let Some(id) = usable_id(node) {
            if graph.contains(id) && !prompts.contains_key(id) {
                prompts.insert(id, node.prompt.as_deref().unwrap_or_default());
            }
        }
    }

    let mut depends_on = DependencySet::new();
    for id in &graph.node_ids {
        let mut deps = BTreeSet::new();
        for edge in incoming.get(id).into_iter().flatten() {
            if edge.source != *id {
                deps.insert(edge.source.clone());
            }
        }
        if let Some(prompt) = prompts.get(id.as_str()) {
            for referenced in template::references(prompt) {
                if referenced != *id && graph.contains(&referenced) {
                    deps.insert(referenced);
                }
            }
        }
        depends_on.insert(id.clone(), deps);
    }

    Dependencies {
        depends_on,
        incoming,
    }
}
