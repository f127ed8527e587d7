//! Workflow engine - the main entry point for Stepflow.
//!
//! The engine owns the tokio runtime and the event channel, compiles graph
//! descriptions into workflows and keeps handles of the runs in flight.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::runtime::{Handle, Runtime};
use tracing::info;

use crate::{
    ChannelEvent, ChannelOptions, Config, Result, StepflowError,
    common::{MemCache, Queue, Shutdown},
    dispatcher::DispatchOptions,
    model::GraphModel,
    runtime::{Channel, NodeExecutor, Run, RunId, RunReport},
    store::NodeRunRecorder,
    workflow::Workflow,
};

/// Maximum number of runs kept in memory.
const RUN_CACHE_SIZE: usize = 2048;
/// Size of the queue for finished run notifications.
const RUN_COMPLETE_QUEUE_SIZE: usize = 100;

/// The main workflow engine.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().executor(Arc::new(MyExecutor)).build()?;
/// engine.launch();
///
/// let run = engine.build_run(&GraphModel::from_json(json_str)?)?;
/// let run_id = engine.run(run.clone())?;
/// let report = engine.wait(&run);
///
/// engine.shutdown();
/// ```
pub struct Engine {
    /// Event channel for broadcasting run events.
    channel: Arc<Channel>,
    /// Receives one NodeRun per node execution attempt.
    recorder: Arc<dyn NodeRunRecorder>,
    /// Runs ordinary nodes.
    executor: Arc<dyn NodeExecutor>,
    /// Queue for receiving run completion notifications.
    runs_complete_queue: Arc<Queue<RunId>>,
    /// In-memory cache of active runs.
    runs: Arc<MemCache<RunId, Arc<Run>>>,

    running: Arc<AtomicBool>,
    runtime: Arc<Runtime>,
    shutdown: Arc<Shutdown>,
    config: Config,
}

impl Engine {
    pub(crate) fn new(
        runtime: Arc<Runtime>,
        executor: Arc<dyn NodeExecutor>,
        recorder: Arc<dyn NodeRunRecorder>,
        config: Config,
    ) -> Self {
        let channel = Arc::new(Channel::new(runtime.handle().clone()));

        Self {
            channel,
            recorder,
            executor,
            runs_complete_queue: Queue::new(RUN_COMPLETE_QUEUE_SIZE),
            runs: Arc::new(MemCache::new(RUN_CACHE_SIZE)),
            running: Arc::new(AtomicBool::new(false)),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
            config,
        }
    }

    /// Starts the engine.
    ///
    /// This method:
    /// - Begins listening on the event channel
    /// - Spawns a background task evicting finished runs
    pub fn launch(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        // register the handler before listening so no completion is missed
        let runs_complete_queue = self.runs_complete_queue.clone();
        if let Ok(events) = ChannelEvent::channel(self.channel.clone(), ChannelOptions::default()) {
            events.on_complete(move |run_id| {
                let _ = runs_complete_queue.send(run_id);
            });
        }
        self.channel.listen();

        let runs_complete_queue = self.runs_complete_queue.clone();
        let shutdown = self.shutdown.clone();
        let runs = self.runs.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Some(run_id) = runs_complete_queue.next_async() => {
                        runs.remove(&run_id);
                    }
                }
            }
        });
        info!("engine launched, max concurrency {}", self.config.max_concurrency);
    }

    /// Stops the engine, canceling every run still in flight.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }

        self.shutdown.shutdown();
        for run in self.runs.values() {
            run.abort();
        }
        self.channel.shutdown();
        info!("engine shut down");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Normalizes, resolves and schedules a graph description.
    pub fn compile(
        &self,
        model: &GraphModel,
    ) -> Result<Arc<Workflow>> {
        Ok(Arc::new(Workflow::try_from(model)?))
    }

    /// Builds a run of `model` without starting it.
    pub fn build_run(
        &self,
        model: &GraphModel,
    ) -> Result<Arc<Run>> {
        let workflow = self.compile(model)?;
        self.build_run_of(workflow)
    }

    /// Builds another run of an already compiled workflow.
    pub fn build_run_of(
        &self,
        workflow: Arc<Workflow>,
    ) -> Result<Arc<Run>> {
        if !self.is_running() {
            return Err(StepflowError::Engine("engine is not running".to_string()));
        }
        let options = DispatchOptions {
            max_concurrency: self.config.max_concurrency,
            max_loop_iterations: self.config.max_loop_iterations,
        };
        Ok(Run::new(workflow, self.executor.clone(), self.recorder.clone(), self.channel.clone(), options))
    }

    /// Starts `run` in the background and returns its id.
    pub fn run(
        &self,
        run: Arc<Run>,
    ) -> Result<RunId> {
        let run_id = run.id().to_string();
        if self.runs.contains(&run_id) {
            return Err(StepflowError::Run(format!("run {} already exists", run_id)));
        }

        self.runs.set(run_id.clone(), run.clone());
        if let Err(err) = run.start(self.runtime.handle()) {
            self.runs.remove(&run_id);
            return Err(err);
        }
        Ok(run_id)
    }

    /// Cancels a run in flight.
    pub fn stop(
        &self,
        run_id: &str,
    ) -> Result<()> {
        match self.runs.get(&run_id.to_string()) {
            Some(run) => {
                run.abort();
                Ok(())
            }
            None => Err(StepflowError::Run(format!("run {} not found", run_id))),
        }
    }

    /// Looks up a run that has not finished yet.
    pub fn get_run(
        &self,
        run_id: &str,
    ) -> Option<Arc<Run>> {
        self.runs.get(&run_id.to_string())
    }

    /// Blocks the calling thread until `run` finishes.
    ///
    /// Must not be called from inside the engine's runtime; use [`Run::wait`] there.
    pub fn wait(
        &self,
        run: &Run,
    ) -> Option<RunReport> {
        futures::executor::block_on(run.wait())
    }

    /// Returns a reference to the event channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
