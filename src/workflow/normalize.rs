//! Graph normalization.
//!
//! Turns a raw [`GraphModel`] into a canonical node-id set and a
//! deduplicated, deterministically ordered edge list. Normalization never
//! fails: anything unusable is dropped.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    model::GraphModel,
    workflow::{
        consts::{LEGACY_SOURCE_PORT, LEGACY_TARGET_PORT},
        edge::{Edge, EdgeKey},
        node::{NodeId, usable_id},
    },
};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedGraph {
    /// every usable node id
    pub node_ids: BTreeSet<NodeId>,
    /// usable node ids in the order they were declared, first occurrence wins
    pub declared_order: Vec<NodeId>,
    /// surviving edges sorted by edge id
    pub edges: Vec<Edge>,
    /// whether `edges` was derived from `inputFrom` links
    pub legacy: bool,
}

impl NormalizedGraph {
    pub fn contains(
        &self,
        id: &str,
    ) -> bool {
        self.node_ids.contains(id)
    }
}

pub fn normalize(model: &GraphModel) -> NormalizedGraph {
    let mut node_ids = BTreeSet::new();
    let mut declared_order = Vec::new();
    for node in &model.nodes {
        match usable_id(node) {
            Some(id) if node_ids.insert(id.to_string()) => declared_order.push(id.to_string()),
            Some(id) => trace!("dropping duplicate node id {}", id),
            None => trace!("dropping node without usable id"),
        }
    }

    let mut edges = explicit_edges(model, &node_ids);
    let mut legacy = false;
    if edges.is_empty() {
        edges = legacy_edges(model, &node_ids);
        legacy = !edges.is_empty();
        if legacy {
            trace!("no explicit edges survived, derived {} edges from inputFrom", edges.len());
        }
    }
    // stable: equal ids keep first-seen order
    edges.sort_by(|a, b| a.id.cmp(&b.id));

    NormalizedGraph {
        node_ids,
        declared_order,
        edges,
        legacy,
    }
}

fn explicit_edges(
    model: &GraphModel,
    node_ids: &BTreeSet<NodeId>,
) -> Vec<Edge> {
    let Some(candidates) = model.edges.as_ref() else {
        return Vec::new();
    };

    let mut seen: HashSet<EdgeKey> = HashSet::new();
    let mut edges = Vec::new();
    for candidate in candidates {
        let (Some(source), Some(target)) = (candidate.source.as_deref(), candidate.target.as_deref()) else {
            trace!("dropping edge {:?}: missing endpoint", candidate.id);
            continue;
        };
        if source.is_empty() || target.is_empty() {
            trace!("dropping edge {:?}: empty endpoint", candidate.id);
            continue;
        }
        if source == target {
            trace!("dropping self edge on {}", source);
            continue;
        }
        if !node_ids.contains(source) || !node_ids.contains(target) {
            trace!("dropping edge {} -> {}: unknown node", source, target);
            continue;
        }

        let id = candidate.id.clone().filter(|id| !id.is_empty());
        let edge = Edge::new(id, source, target, candidate.source_port.clone(), candidate.target_port.clone());
        if seen.insert(edge.key()) {
            edges.push(edge);
        } else {
            trace!("dropping duplicate edge {}", edge.id);
        }
    }
    edges
}

fn legacy_edges(
    model: &GraphModel,
    node_ids: &BTreeSet<NodeId>,
) -> Vec<Edge> {
    let mut visited = HashSet::new();
    model
        .nodes
        .iter()
        .filter_map(|node| {
            let id = usable_id(node)?;
            // a duplicated node id only contributes its first declaration
            if !visited.insert(id) {
                return None;
            }
            let from = node.input_from.as_deref()?;
            if from == id || !node_ids.contains(from) {
                return None;
            }
            Some(Edge::new(None, from, id, Some(LEGACY_SOURCE_PORT.to_string()), Some(LEGACY_TARGET_PORT.to_string())))
        })
        .collect()
}
