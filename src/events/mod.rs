//! Event types for run execution.
//!
//! Events are broadcast while a run progresses so subscribers can follow
//! run lifecycle changes and every NodeRun status transition.

mod node;
mod run;

pub use node::*;
pub use run::*;

use crate::{runtime::RunId, workflow::node::NodeId};

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

/// Top-level event type.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    /// Run-level events (started, succeeded, failed, canceled).
    Run(RunEvent),
    /// NodeRun-level events (running, succeeded, skipped, etc.).
    Node(NodeEvent),
}

/// Event message keyed by run, node and iteration.
#[derive(Debug, Clone)]
pub struct Message {
    /// Run that generated this event.
    pub run_id: RunId,
    /// Node that generated this event (empty for run events).
    pub node_id: NodeId,
    /// Loop iteration of the NodeRun, 0 outside loops and for run events.
    pub iteration: u32,
    /// The actual event data.
    pub event: GraphEvent,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl GraphEvent {
    /// Run finished, whatever the outcome.
    pub fn is_complete(&self) -> bool {
        matches!(self, GraphEvent::Run(RunEvent::Succeeded | RunEvent::Failed(_) | RunEvent::Canceled))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GraphEvent::Run(RunEvent::Failed(_)) | GraphEvent::Node(NodeEvent::Failed(_)))
    }
}
