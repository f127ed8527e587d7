//! NodeRun recording.
//!
//! The engine reports every execution attempt to a [`NodeRunRecorder`]:
//! `begin` when the node is about to run (or is settled without running) and
//! `finish` with its terminal status. Recorded state is never read back for
//! scheduling decisions.
//!
//! - `MemRecorder`: in-memory implementation, used by tests and embedders
//!   that do not need persistence

pub mod data;
mod mem;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, runtime::NodeOutput, workflow::node::NodeRunStatus};

pub use mem::MemRecorder;

/// Identifier handed out by [`NodeRunRecorder::begin`].
pub type RecordId = String;

/// Terminal result reported through [`NodeRunRecorder::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunOutcome {
    pub status: NodeRunStatus,
    pub output_text: Option<String>,
    pub output_json: Option<Value>,
    pub primary_artifact_id: Option<String>,
    pub error: Option<String>,
}

impl NodeRunOutcome {
    fn with_status(status: NodeRunStatus) -> Self {
        Self {
            status,
            output_text: None,
            output_json: None,
            primary_artifact_id: None,
            error: None,
        }
    }

    pub fn succeeded(output: &NodeOutput) -> Self {
        Self {
            output_text: output.text.clone(),
            output_json: output.json.clone(),
            primary_artifact_id: output.artifact_id.clone(),
            ..Self::with_status(NodeRunStatus::Succeeded)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(NodeRunStatus::Failed)
        }
    }

    /// Outcome of a NodeRun that never reached the executor.
    pub fn settled(status: NodeRunStatus) -> Self {
        Self::with_status(status)
    }
}

/// External collaborator persisting NodeRun records.
///
/// `(run_id, node_id, iteration)` identifies a record and must be unique
/// within a recorder; implementations reject a second `begin` for the same key.
#[async_trait]
pub trait NodeRunRecorder: Send + Sync {
    async fn begin(
        &self,
        run_id: &str,
        node_id: &str,
        iteration: u32,
        input: &Value,
    ) -> Result<RecordId>;

    async fn finish(
        &self,
        record_id: &str,
        outcome: NodeRunOutcome,
    ) -> Result<()>;
}
