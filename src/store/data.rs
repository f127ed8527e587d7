use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{store::RecordId, workflow::node::NodeRunStatus};

/// One recorded execution attempt of a node.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NodeRun {
    pub id: RecordId,
    pub run_id: String,
    pub node_id: String,
    pub iteration: u32,

    pub input: Value,
    pub status: NodeRunStatus,
    pub output_text: Option<String>,
    pub output_json: Option<Value>,
    pub primary_artifact_id: Option<String>,
    pub err: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
}
