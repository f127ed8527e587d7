//! The external node executor contract.
//!
//! Stepflow never computes a step itself. Ordinary nodes are handed to a
//! [`NodeExecutor`] together with their rendered prompt and the outputs of
//! the nodes they depend on.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Result,
    runtime::{Context, RunId},
    workflow::{
        node::{Node, NodeId},
        template::LoopVars,
    },
};

/// What a node produced. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutput {
    pub text: Option<String>,
    pub json: Option<Value>,
    pub artifact_id: Option<String>,
}

impl NodeOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn json(json: Value) -> Self {
        Self {
            json: Some(json),
            ..Default::default()
        }
    }

    pub fn with_json(
        mut self,
        json: Value,
    ) -> Self {
        self.json = Some(json);
        self
    }

    pub fn with_artifact(
        mut self,
        artifact_id: impl Into<String>,
    ) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }
}

/// Everything an executor needs to run one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub run_id: RunId,
    pub node: Node,
    pub iteration: u32,
    /// counters of the innermost enclosing loop
    #[serde(skip)]
    pub loop_vars: Option<LoopVars>,
    /// prompt with every resolvable template substituted
    pub prompt: Option<String>,
    /// outputs of the nodes this one depends on
    pub inputs: BTreeMap<NodeId, NodeOutput>,
}

impl ExecutionRequest {
    /// Input snapshot handed to the recorder.
    pub fn snapshot(&self) -> Value {
        json!({
            "type": self.node.tag,
            "prompt": self.prompt,
            "iteration": self.iteration,
            "inputs": self.inputs,
        })
    }
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Runs one node. An `Err` marks the attempt failed; it is retried when
    /// the node carries a retry policy.
    async fn execute(
        &self,
        ctx: Arc<Context>,
        request: ExecutionRequest,
    ) -> Result<NodeOutput>;
}
