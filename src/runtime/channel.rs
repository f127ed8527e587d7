use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::{
    Result, ShareLock, StepflowError,
    common::{BroadcastQueue, Shutdown},
    events::{Event, Message},
    runtime::RunId,
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        let handlers = $handles.read().unwrap().clone();
        for handle in handlers.iter() {
            (handle)($(&$item),+);
        }
    };
}

macro_rules! dispatch_event_async {
    ($handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        tokio::spawn(async move {
            let handlers = handles.read().unwrap().clone();
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;

pub type RunEventHandle = Arc<dyn Fn(&Event<Message>) + Send + Sync>;
pub type RunEventHandleAsync = Arc<dyn Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// use the glob pattern to match the run id
    /// eg. run1*
    pub run_id: String,

    /// use the glob pattern to match the node id
    /// eg. summarize-*
    pub node_id: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            run_id: "*".to_string(),
            node_id: "*".to_string(),
        }
    }
}

impl ChannelOptions {
    pub fn new(
        run_id: String,
        node_id: String,
    ) -> Self {
        Self {
            run_id,
            node_id,
        }
    }

    pub fn with_run_id(run_id: String) -> Self {
        Self {
            run_id,
            ..Default::default()
        }
    }

    pub fn with_node_id(node_id: String) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event<Message>>>,

    events: ShareLock<Vec<RunEventHandle>>,
    events_async: ShareLock<Vec<RunEventHandleAsync>>,

    handle: Handle,
    shutdown: Arc<Shutdown>,
}

impl Channel {
    pub(crate) fn new(handle: Handle) -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            handle,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub(crate) fn event_queue(&self) -> Arc<BroadcastQueue<Event<Message>>> {
        self.event_queue.clone()
    }

    /// Starts forwarding broadcast events to the registered handlers.
    pub(crate) fn listen(&self) {
        let mut event_queue = self.event_queue.subscribe();
        let events = self.events.clone();
        let events_async = self.events_async.clone();

        let shutdown = self.shutdown.clone();
        self.handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(events_async, &e);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Filtered subscription to a [`Channel`].
#[derive(Clone)]
pub struct ChannelEvent {
    channel: Arc<Channel>,

    glob: (globset::GlobMatcher, globset::GlobMatcher),
}

impl ChannelEvent {
    pub fn channel(
        channel: Arc<Channel>,
        options: ChannelOptions,
    ) -> Result<Self> {
        let matcher = |pattern: &str| {
            globset::Glob::new(pattern).map(|g| g.compile_matcher()).map_err(|e| StepflowError::Engine(format!("invalid channel pattern {}: {}", pattern, e)))
        };
        Ok(Self {
            channel,
            glob: (matcher(&options.run_id)?, matcher(&options.node_id)?),
        })
    }

    /// Called once per finished run with its id.
    pub fn on_complete(
        &self,
        f: impl Fn(RunId) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.event.is_complete() && is_match(&glob, e) {
                f(e.run_id.clone());
            }
        }));
    }

    pub fn on_error(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if e.event.is_error() && is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.events.write().unwrap().push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        self.channel.events_async.write().unwrap().push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e)
            } else {
                Box::pin(async {})
            }
        }));
    }
}

fn is_match(
    glob: &(globset::GlobMatcher, globset::GlobMatcher),
    e: &Event<Message>,
) -> bool {
    let (pat_run, pat_node) = glob;
    // run events carry an empty node id and only need the run pattern
    pat_run.is_match(&e.run_id) && (e.node_id.is_empty() || pat_node.is_match(&e.node_id))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::{GraphEvent, NodeEvent, RunEvent};

    fn message(
        run_id: &str,
        node_id: &str,
        event: GraphEvent,
    ) -> Event<Message> {
        Event::new(&Message {
            run_id: run_id.into(),
            node_id: node_id.into(),
            iteration: 0,
            event,
        })
    }

    #[tokio::test]
    async fn test_filtered_delivery() {
        let channel = Arc::new(Channel::new(Handle::current()));
        let (tx, rx) = flume::unbounded::<String>();

        let options = ChannelOptions::new("run-1*".into(), "step-*".into());
        ChannelEvent::channel(channel.clone(), options).unwrap().on_event(move |e| {
            let _ = tx.send(format!("{}/{}", e.run_id, e.node_id));
        });
        channel.listen();

        let queue = channel.event_queue();
        queue.send(message("run-2", "step-a", GraphEvent::Node(NodeEvent::Skipped)));
        queue.send(message("run-1", "other", GraphEvent::Node(NodeEvent::Skipped)));
        queue.send(message("run-1", "step-a", GraphEvent::Node(NodeEvent::Blocked)));
        queue.send(message("run-1", "", GraphEvent::Run(RunEvent::Succeeded)));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv_async()).await.unwrap().unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), rx.recv_async()).await.unwrap().unwrap();
        assert_eq!(first, "run-1/step-a");
        assert_eq!(second, "run-1/");
        channel.shutdown();
    }

    #[tokio::test]
    async fn test_on_complete() {
        let channel = Arc::new(Channel::new(Handle::current()));
        let (tx, rx) = flume::unbounded::<RunId>();
        ChannelEvent::channel(channel.clone(), ChannelOptions::default()).unwrap().on_complete(move |run_id| {
            let _ = tx.send(run_id);
        });
        channel.listen();

        channel.event_queue().send(message("r", "", GraphEvent::Run(RunEvent::Started)));
        channel.event_queue().send(message("r", "", GraphEvent::Run(RunEvent::Canceled)));
        let done = tokio::time::timeout(Duration::from_secs(1), rx.recv_async()).await.unwrap().unwrap();
        assert_eq!(done, "r");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let channel = Arc::new(Channel::new(runtime.handle().clone()));
        assert!(ChannelEvent::channel(channel, ChannelOptions::with_run_id("[".into())).is_err());
    }
}
