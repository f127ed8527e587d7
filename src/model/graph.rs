use serde::{Deserialize, Serialize};

use crate::{
    Result, StepflowError,
    model::{EdgeModel, NodeModel, lenient_list, lenient_optional_list},
};

/// Graph as authored: `{ nodes: Node[], edges?: Edge[] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphModel {
    #[serde(default, deserialize_with = "lenient_list")]
    pub nodes: Vec<NodeModel>,
    #[serde(default, deserialize_with = "lenient_optional_list", skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<EdgeModel>>,
}

impl GraphModel {
    /// Parses a graph document. Only a document that is not JSON at all, or
    /// whose top level is not an object, is an error.
    pub fn from_json(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if !value.is_object() {
            return Err(StepflowError::Graph("graph description must be a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| StepflowError::Graph(e.to_string()))
    }

    pub fn new(
        nodes: Vec<NodeModel>,
        edges: Option<Vec<EdgeModel>>,
    ) -> Self {
        Self {
            nodes,
            edges,
        }
    }
}
