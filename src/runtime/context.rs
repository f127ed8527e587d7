use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use crate::{
    ShareLock,
    common::Shutdown,
    events::{Event, GraphEvent, Message},
    runtime::{Channel, NodeOutput, RunId},
    workflow::node::NodeId,
};

/// Run-scoped state shared between the dispatcher and executors.
#[derive(Clone)]
pub struct Context {
    run_id: RunId,
    /// latest output of every node that succeeded so far
    outputs: ShareLock<BTreeMap<NodeId, NodeOutput>>,
    channel: Arc<Channel>,

    cancel: Arc<Shutdown>,
}

impl Context {
    pub fn new(
        run_id: RunId,
        channel: Arc<Channel>,
    ) -> Self {
        Self {
            run_id,
            outputs: Arc::new(RwLock::new(BTreeMap::new())),
            channel,
            cancel: Arc::new(Shutdown::new()),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id.to_owned()
    }

    /// Snapshot of all outputs.
    pub fn outputs(&self) -> BTreeMap<NodeId, NodeOutput> {
        self.outputs.read().unwrap().clone()
    }

    pub fn output(
        &self,
        nid: &str,
    ) -> Option<NodeOutput> {
        self.outputs.read().unwrap().get(nid).cloned()
    }

    pub fn add_output(
        &self,
        nid: NodeId,
        output: NodeOutput,
    ) {
        self.outputs.write().unwrap().insert(nid, output);
    }

    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    pub fn emit(
        &self,
        nid: &str,
        iteration: u32,
        event: GraphEvent,
    ) {
        let _ = self.channel.event_queue().send(Event::new(&Message {
            run_id: self.run_id.clone(),
            node_id: nid.to_string(),
            iteration,
            event,
        }));
    }

    /// Trips the run's cancellation signal.
    pub fn cancel(&self) {
        self.cancel.shutdown();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_terminated()
    }

    pub fn wait_canceled(&self) -> impl Future<Output = ()> + Send + 'static {
        self.cancel.wait()
    }
}
