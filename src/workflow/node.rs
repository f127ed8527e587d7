use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    model::NodeModel,
    workflow::consts::{CONFIG_RETRY, TAG_CONDITIONAL, TAG_LOOP_END, TAG_LOOP_START},
};

/// node id
pub type NodeId = String;

/// Closed set of node roles the scheduler understands.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum NodeKind {
    /// Ordinary prompt step, handed to the executor.
    #[default]
    Step,
    LoopStart,
    LoopEnd,
    Conditional,
}

impl NodeKind {
    /// Maps a raw `type` tag. Unknown or missing tags are ordinary steps.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else {
            return NodeKind::Step;
        };
        let canonical = tag.trim().to_ascii_lowercase().replace('_', "-");
        match canonical.as_str() {
            TAG_LOOP_START | "loopstart" => NodeKind::LoopStart,
            TAG_LOOP_END | "loopend" => NodeKind::LoopEnd,
            TAG_CONDITIONAL | "condition" | "if" => NodeKind::Conditional,
            _ => NodeKind::Step,
        }
    }

    /// Control nodes are evaluated by the dispatcher itself.
    pub fn is_control(&self) -> bool {
        !matches!(self, NodeKind::Step)
    }
}

/// Status of one NodeRun record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeRunStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    /// pruned by a conditional branch or an unentered loop region
    Skipped,
    /// a dependency failed
    Blocked,
    Canceled,
}

impl NodeRunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeRunStatus::Pending | NodeRunStatus::Running)
    }

    /// Whether a dependent may still run once this status is reached.
    pub fn unblocks_dependents(&self) -> bool {
        matches!(self, NodeRunStatus::Succeeded | NodeRunStatus::Skipped)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// retry times
    pub times: u32,
    /// retry interval in milliseconds
    #[serde(default)]
    pub interval: u64,
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}

/// Canonical node, immutable for the lifetime of a compiled workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    /// the raw `type` tag, passed through to executors
    pub tag: Option<String>,
    pub prompt: Option<String>,
    pub retry: Option<RetryConfig>,
    pub config: Map<String, Value>,
}

impl Node {
    /// Returns `None` for entries without a usable id.
    pub fn from_model(model: &NodeModel) -> Option<Self> {
        let id = usable_id(model)?;
        let retry = model.config.get(CONFIG_RETRY).and_then(|v| serde_json::from_value(v.clone()).ok());

        Some(Self {
            id: id.to_string(),
            kind: NodeKind::from_tag(model.kind.as_deref()),
            tag: model.kind.clone(),
            prompt: model.prompt.clone(),
            retry,
            config: model.config.clone(),
        })
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.config.get(key)
    }
}

/// A node id is usable when it is a non-blank string.
pub(crate) fn usable_id(model: &NodeModel) -> Option<&str> {
    model.id.as_deref().filter(|id| !id.trim().is_empty())
}
