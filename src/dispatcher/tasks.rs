//! Executor tasks in flight.

use std::{collections::HashMap, future::Future};

use tokio::task::{Id, JoinSet};
use tracing::error;

use crate::{
    runtime::NodeOutput,
    store::RecordId,
    workflow::node::NodeId,
};

pub(crate) enum TaskResult {
    Output(NodeOutput),
    Failed(String),
    Canceled,
}

/// The NodeRun a task belongs to.
pub(crate) struct Launched {
    pub node_id: NodeId,
    pub record_id: RecordId,
    pub iteration: u32,
}

pub(crate) struct Completion {
    pub node_id: NodeId,
    pub record_id: RecordId,
    pub iteration: u32,
    pub result: TaskResult,
}

/// Join set keyed by task id, so a task that dies without returning still
/// resolves to its NodeRun.
#[derive(Default)]
pub(crate) struct Tasks {
    set: JoinSet<TaskResult>,
    in_flight: HashMap<Id, Launched>,
}

impl Tasks {
    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn spawn<F>(
        &mut self,
        launched: Launched,
        task: F,
    ) where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let handle = self.set.spawn(task);
        self.in_flight.insert(handle.id(), launched);
    }

    /// Waits for the next task. A panicked or aborted task completes as failed.
    pub async fn join_next(&mut self) -> Option<Completion> {
        loop {
            let (id, result) = match self.set.join_next_with_id().await? {
                Ok(done) => done,
                Err(err) => {
                    error!("node task {} was lost: {}", err.id(), err);
                    (err.id(), TaskResult::Failed(format!("node task was lost: {}", err)))
                }
            };
            if let Some(Launched {
                node_id,
                record_id,
                iteration,
            }) = self.in_flight.remove(&id)
            {
                return Some(Completion {
                    node_id,
                    record_id,
                    iteration,
                    result,
                });
            }
        }
    }
}
