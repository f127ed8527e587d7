use std::fmt;

use crate::{utils, workflow::node::NodeRunStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Running(i64),
    Succeeded(i64),
    Failed(ErrorReason),
    Skipped,
    Blocked,
    Canceled(i64),
    Retry,
}

impl NodeEvent {
    pub fn str(&self) -> &str {
        match self {
            NodeEvent::Running(_) => "Running",
            NodeEvent::Succeeded(_) => "Succeeded",
            NodeEvent::Failed(_) => "Failed",
            NodeEvent::Skipped => "Skipped",
            NodeEvent::Blocked => "Blocked",
            NodeEvent::Canceled(_) => "Canceled",
            NodeEvent::Retry => "Retry",
        }
    }

    /// Event announcing that a NodeRun reached `status`. `None` for pending.
    pub fn from_status(
        status: NodeRunStatus,
        error: Option<String>,
    ) -> Option<Self> {
        let now = utils::time_millis();
        match status {
            NodeRunStatus::Pending => None,
            NodeRunStatus::Running => Some(NodeEvent::Running(now)),
            NodeRunStatus::Succeeded => Some(NodeEvent::Succeeded(now)),
            NodeRunStatus::Failed => Some(NodeEvent::Failed(ErrorReason::Failed(error.unwrap_or_default()))),
            NodeRunStatus::Skipped => Some(NodeEvent::Skipped),
            NodeRunStatus::Blocked => Some(NodeEvent::Blocked),
            NodeRunStatus::Canceled => Some(NodeEvent::Canceled(now)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorReason {
    /// the executor reported a failure
    Failed(String),
    /// the NodeRun could not be recorded
    Exception(String),
}

impl fmt::Display for ErrorReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ErrorReason::Failed(msg) => write!(f, "Failed: {}", msg),
            ErrorReason::Exception(msg) => write!(f, "Exception: {}", msg),
        }
    }
}
