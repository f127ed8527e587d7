//! Canonical edges connecting nodes.
//!
//! Ports are free-form labels; `cond-true` / `cond-false` on a conditional
//! node's side mark the two branches.

use serde::{Deserialize, Serialize};

use crate::workflow::{
    consts::{COND_FALSE_PORT, COND_TRUE_PORT},
    node::NodeId,
};

/// Unique identifier for an edge within a workflow.
pub type EdgeId = String;

/// Composite identity used for de-duplication.
pub type EdgeKey = (NodeId, NodeId, Option<String>, Option<String>);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_port: Option<String>,
}

impl Edge {
    pub fn new(
        id: Option<String>,
        source: &str,
        target: &str,
        source_port: Option<String>,
        target_port: Option<String>,
    ) -> Self {
        let id = id.unwrap_or_else(|| synthesize_id(source, target, source_port.as_deref(), target_port.as_deref()));
        Self {
            id,
            source: source.to_string(),
            target: target.to_string(),
            source_port,
            target_port,
        }
    }

    pub fn key(&self) -> EdgeKey {
        (self.source.clone(), self.target.clone(), self.source_port.clone(), self.target_port.clone())
    }

    /// True for edges leaving a conditional through one of its two branch ports.
    pub fn is_branch(&self) -> bool {
        matches!(self.source_port.as_deref(), Some(COND_TRUE_PORT) | Some(COND_FALSE_PORT))
    }
}

fn synthesize_id(
    source: &str,
    target: &str,
    source_port: Option<&str>,
    target_port: Option<&str>,
) -> EdgeId {
    format!("{}:{}->{}:{}", source, source_port.unwrap_or_default(), target, target_port.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesized_id() {
        let edge = Edge::new(None, "a", "b", Some("right".into()), None);
        assert_eq!(edge.id, "a:right->b:");
        let edge = Edge::new(Some("e1".into()), "a", "b", None, None);
        assert_eq!(edge.id, "e1");
    }

    #[test]
    fn test_is_branch() {
        assert!(Edge::new(None, "c", "x", Some(COND_TRUE_PORT.into()), None).is_branch());
        assert!(Edge::new(None, "c", "y", Some(COND_FALSE_PORT.into()), None).is_branch());
        assert!(!Edge::new(None, "c", "z", None, None).is_branch());
    }
}
