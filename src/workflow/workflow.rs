//! Compiled workflow.
//!
//! A [`Workflow`] is built once from a [`GraphModel`] and never mutated
//! afterwards: canonical nodes, the normalized edge list, the dependency set,
//! the execution plan and the loop regions. Runs share it behind an `Arc`
//! and keep their own mutable state elsewhere.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::{
    Result, StepflowError,
    model::GraphModel,
    utils,
    workflow::{
        condition::Condition,
        consts::CONFIG_CONDITION,
        dependency::{Dependencies, DependencyGraph, outgoing_index, resolve_dependencies},
        edge::Edge,
        loops::{LoopRegion, detect_regions},
        node::{Node, NodeId, NodeKind},
        normalize::{NormalizedGraph, normalize},
        schedule::{ExecutionPlan, schedule},
    },
};

#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    nodes: BTreeMap<NodeId, Node>,
    graph: NormalizedGraph,
    dependencies: Dependencies,
    outgoing: BTreeMap<NodeId, Vec<Edge>>,
    plan: ExecutionPlan,
    regions: Vec<LoopRegion>,
    /// body node -> index of its innermost enclosing region
    innermost: HashMap<NodeId, usize>,
    conditions: HashMap<NodeId, Condition>,
    /// dependency -> dependent, over edges and template references
    dag: DependencyGraph,
}

impl Workflow {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    pub fn node(
        &self,
        id: &str,
    ) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn graph(&self) -> &NormalizedGraph {
        &self.graph
    }

    pub fn edges(&self) -> &[Edge] {
        &self.graph.edges
    }

    pub fn dependencies(&self) -> &Dependencies {
        &self.dependencies
    }

    pub fn outgoing(&self) -> &BTreeMap<NodeId, Vec<Edge>> {
        &self.outgoing
    }

    /// Edges leaving `id`, sorted by edge id.
    pub fn outgoing_edges(
        &self,
        id: &str,
    ) -> &[Edge] {
        self.outgoing.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn regions(&self) -> &[LoopRegion] {
        &self.regions
    }

    pub fn region(
        &self,
        index: usize,
    ) -> Option<&LoopRegion> {
        self.regions.get(index)
    }

    /// Innermost region whose body contains `id`.
    pub fn innermost_region(
        &self,
        id: &str,
    ) -> Option<usize> {
        self.innermost.get(id).copied()
    }

    /// Region opened by the loop-start node `id`.
    pub fn region_started_by(
        &self,
        id: &str,
    ) -> Option<usize> {
        self.regions.iter().position(|r| r.start == id)
    }

    /// Region closed by the loop-end node `id`.
    pub fn region_ended_by(
        &self,
        id: &str,
    ) -> Option<usize> {
        self.regions.iter().position(|r| r.end == id)
    }

    /// Nested regions of `index`, at any depth.
    pub fn descendant_regions(
        &self,
        index: usize,
    ) -> Vec<usize> {
        let Some(region) = self.regions.get(index) else {
            return Vec::new();
        };
        (0..self.regions.len()).filter(|&i| i != index && region.encloses(self.regions[i].start_pos)).collect()
    }

    pub fn condition(
        &self,
        id: &str,
    ) -> Option<&Condition> {
        self.conditions.get(id)
    }

    pub fn dependency_graph(&self) -> &DependencyGraph {
        &self.dag
    }

    /// Output a human-readable representation of the workflow
    pub fn schema(&self) -> String {
        let mut lines = Vec::new();

        lines.push("=== Workflow Graph ===".to_string());
        lines.push(format!("Nodes: {}, Edges: {}, Dependencies: {}, Regions: {}", self.dag.node_count(), self.graph.edges.len(), self.dag.edge_count(), self.regions.len()));
        if self.plan.schedule().is_fallback() {
            lines.push("Plan: declaration order (cyclic dependencies)".to_string());
        }
        lines.push(String::new());

        lines.push("--- Plan ---".to_string());
        for (pos, id) in self.plan.order().iter().enumerate() {
            let kind = self.nodes.get(id).map(|n| n.kind).unwrap_or_default();
            let deps: Vec<&str> = self.dependencies.of(id).map(String::as_str).collect();
            lines.push(format!("{:>3}. {} ({}) <- [{}]", pos, id, kind.as_ref(), deps.join(", ")));
        }
        lines.push(String::new());

        lines.push("--- Graph Structure ---".to_string());
        for id in &self.graph.declared_order {
            let targets: Vec<String> = self
                .outgoing_edges(id)
                .iter()
                .map(|e| match e.source_port.as_deref() {
                    Some(port) => format!("{}({})", e.target, port),
                    None => e.target.clone(),
                })
                .collect();
            if targets.is_empty() {
                lines.push(format!("{} -> (end)", id));
            } else {
                lines.push(format!("{} -> {}", id, targets.join(", ")));
            }
        }

        lines.join("\n")
    }
}

impl TryFrom<&GraphModel> for Workflow {
    type Error = StepflowError;

    fn try_from(model: &GraphModel) -> Result<Self> {
        let graph = normalize(model);
        let dependencies = resolve_dependencies(model, &graph);
        let dag = DependencyGraph::new(&graph.declared_order, &dependencies.depends_on);

        let mut nodes: BTreeMap<NodeId, Node> = BTreeMap::new();
        for node in model.nodes.iter().filter_map(Node::from_model) {
            nodes.entry(node.id.clone()).or_insert(node);
        }

        let mut conditions = HashMap::new();
        for node in nodes.values().filter(|n| n.kind == NodeKind::Conditional) {
            conditions.insert(node.id.clone(), Condition::parse(&node.id, node.get(CONFIG_CONDITION))?);
        }

        // loop regions may move unrelated nodes out of a body, so the plan is final only afterwards
        let (plan, regions) = detect_regions(ExecutionPlan::new(schedule(&graph, &dependencies.depends_on)), &nodes, &dag)?;
        let mut innermost = HashMap::new();
        // parents precede children, so the last write is the innermost region
        for (index, region) in regions.iter().enumerate() {
            for id in &region.body {
                innermost.insert(id.clone(), index);
            }
        }

        let outgoing = outgoing_index(&graph.edges);
        let workflow = Self {
            id: utils::longid(),
            nodes,
            graph,
            dependencies,
            outgoing,
            plan,
            regions,
            innermost,
            conditions,
            dag,
        };
        debug!("compiled workflow {}\n{}", workflow.id, workflow.schema());
        Ok(workflow)
    }
}

impl TryFrom<GraphModel> for Workflow {
    type Error = StepflowError;

    fn try_from(model: GraphModel) -> Result<Self> {
        Workflow::try_from(&model)
    }
}
