use std::{
    collections::BTreeMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::info;

use crate::{
    Result, ShareLock, StepflowError,
    common::Shutdown,
    dispatcher::{DispatchOptions, Dispatcher},
    events::{GraphEvent, RunEvent},
    runtime::{Channel, Context, NodeExecutor, NodeOutput},
    store::NodeRunRecorder,
    utils,
    workflow::{NodeId, NodeRunStatus, Schedule, Workflow},
};

pub type RunId = String;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled)
    }
}

/// Summary of a finished run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    /// the plan the run followed, including whether it was a fallback
    pub schedule: Schedule,
    /// final status of every node, from its last NodeRun
    pub nodes: BTreeMap<NodeId, NodeRunStatus>,
    /// nodes that failed at least once
    pub failed: Vec<NodeId>,
    pub outputs: BTreeMap<NodeId, NodeOutput>,
}

/// One execution of a compiled [`Workflow`].
pub struct Run {
    id: RunId,
    workflow: Arc<Workflow>,
    ctx: Arc<Context>,
    dispatcher: Dispatcher,

    status: ShareLock<RunStatus>,
    report: ShareLock<Option<RunReport>>,
    started: AtomicBool,
    done: Shutdown,
}

impl Run {
    pub fn new(
        workflow: Arc<Workflow>,
        executor: Arc<dyn NodeExecutor>,
        recorder: Arc<dyn NodeRunRecorder>,
        channel: Arc<Channel>,
        options: DispatchOptions,
    ) -> Arc<Self> {
        let id = utils::longid();
        let ctx = Arc::new(Context::new(id.clone(), channel));
        let dispatcher = Dispatcher::new(ctx.clone(), workflow.clone(), executor, recorder, options);

        Arc::new(Self {
            id,
            workflow,
            ctx,
            dispatcher,
            status: Arc::new(RwLock::new(RunStatus::Pending)),
            report: Arc::new(RwLock::new(None)),
            started: AtomicBool::new(false),
            done: Shutdown::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow(&self) -> Arc<Workflow> {
        self.workflow.clone()
    }

    pub fn context(&self) -> Arc<Context> {
        self.ctx.clone()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.read().unwrap()
    }

    /// Spawns the run on `handle` and returns immediately.
    pub fn start(
        self: &Arc<Self>,
        handle: &Handle,
    ) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StepflowError::Run(format!("run {} already started", self.id)));
        }
        let run = self.clone();
        handle.spawn(async move { run.drive().await });
        Ok(())
    }

    /// Runs to completion on the current task. A canceled run yields
    /// [`StepflowError::Canceled`]; its report is still kept in [`Run::report`].
    pub async fn execute(&self) -> Result<RunReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StepflowError::Run(format!("run {} already started", self.id)));
        }
        let report = self.drive().await;
        if report.status == RunStatus::Canceled {
            return Err(StepflowError::Canceled);
        }
        Ok(report)
    }

    async fn drive(&self) -> RunReport {
        *self.status.write().unwrap() = RunStatus::Running;
        self.ctx.emit("", 0, GraphEvent::Run(RunEvent::Started));

        let report = self.dispatcher.run().await;

        *self.status.write().unwrap() = report.status;
        *self.report.write().unwrap() = Some(report.clone());
        self.done.shutdown();

        let event = match report.status {
            RunStatus::Canceled => RunEvent::Canceled,
            RunStatus::Failed => RunEvent::Failed(report.failed.clone()),
            _ => RunEvent::Succeeded,
        };
        info!("run {} of workflow {}: {}", self.id, self.workflow.id(), event.str());
        self.ctx.emit("", 0, GraphEvent::Run(event));
        report
    }

    /// Cancels the run. Nodes that have not started are recorded as canceled.
    pub fn abort(&self) {
        self.ctx.cancel();
    }

    /// Resolves with the report once the run has finished.
    pub async fn wait(&self) -> Option<RunReport> {
        self.done.wait().await;
        self.report()
    }

    pub fn is_complete(&self) -> bool {
        self.done.is_terminated()
    }

    pub fn report(&self) -> Option<RunReport> {
        self.report.read().unwrap().clone()
    }
}
