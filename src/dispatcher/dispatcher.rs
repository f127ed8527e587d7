//! Run dispatcher.
//!
//! The dispatcher walks the execution plan with a cursor:
//! - nodes start in plan order, up to `max_concurrency` at a time
//! - a node starts once every dependency positioned earlier in the plan is
//!   terminal; a failed, blocked or canceled dependency blocks it
//! - while the cursor waits on a plain node, later plain nodes that are
//!   already unblocked start ahead of it, up to the next control node
//! - loop-start, loop-end and conditional nodes are evaluated inline
//! - every node reaching a terminal state produces exactly one NodeRun per
//!   iteration, whether it ran or not

use std::{collections::BTreeMap, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::{
    events::{ErrorReason, GraphEvent, NodeEvent},
    runtime::{Context, ExecutionRequest, NodeExecutor, NodeOutput, RunReport, RunStatus},
    store::{NodeRunOutcome, NodeRunRecorder},
    workflow::{
        Workflow,
        branch::{prune_unselected, select_port},
        consts::{CONDITION_RESULT, CONDITION_SELECTED, LOOP_CONTINUE, LOOP_ITERATION, LOOP_LIMIT_REACHED, LOOP_PASS},
        loops::{LoopDecision, LoopPhase},
        node::{Node, NodeId, NodeKind, NodeRunStatus, RetryConfig},
        template::{self, LoopVars, Scope},
    },
};

use super::{
    state::RunState,
    tasks::{Completion, Launched, TaskResult, Tasks},
};

/// Limits applied to a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub max_concurrency: usize,
    pub max_loop_iterations: u32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_loop_iterations: 100,
        }
    }
}

/// What the cursor does after looking at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Next,
    Jump(usize),
    /// the node cannot start until something in flight finishes
    Wait,
}

enum Gate {
    Open,
    Wait,
    Blocked,
}

pub struct Dispatcher {
    ctx: Arc<Context>,
    workflow: Arc<Workflow>,
    executor: Arc<dyn NodeExecutor>,
    recorder: Arc<dyn NodeRunRecorder>,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<Context>,
        workflow: Arc<Workflow>,
        executor: Arc<dyn NodeExecutor>,
        recorder: Arc<dyn NodeRunRecorder>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            ctx,
            workflow,
            executor,
            recorder,
            options: DispatchOptions {
                max_concurrency: options.max_concurrency.max(1),
                ..options
            },
        }
    }

    /// Runs the whole plan to completion or cancellation.
    pub async fn run(&self) -> RunReport {
        let plan = self.workflow.plan();
        let mut state = RunState::new(self.workflow.regions().len());
        let mut tasks = Tasks::default();
        let mut cursor = 0;

        info!("run {} started, {} nodes planned", self.ctx.run_id(), plan.len());
        loop {
            while cursor < plan.len() && !self.ctx.is_canceled() {
                match self.step(cursor, &mut state, &mut tasks).await {
                    Step::Next => cursor += 1,
                    Step::Jump(pos) => cursor = pos,
                    Step::Wait => break,
                }
            }
            if self.ctx.is_canceled() {
                break;
            }
            if cursor < plan.len() {
                self.start_ahead(cursor, &mut state, &mut tasks).await;
            }
            if tasks.is_empty() {
                if cursor >= plan.len() {
                    break;
                }
                // nothing in flight can unblock the cursor
                error!("run {} stalled at node {}", self.ctx.run_id(), plan.order()[cursor]);
                let id = plan.order()[cursor].clone();
                cursor = self.settle_one(&id, NodeRunStatus::Blocked, &mut state).await;
                continue;
            }

            tokio::select! {
                Some(done) = tasks.join_next() => self.complete(done, &mut state).await,
                _ = self.ctx.wait_canceled() => {}
            }
        }

        while let Some(done) = tasks.join_next().await {
            self.complete(done, &mut state).await;
        }

        if self.ctx.is_canceled() {
            info!("run {} canceled, settling {} remaining nodes", self.ctx.run_id(), plan.len().saturating_sub(cursor));
            for pos in cursor..plan.len() {
                let id = plan.order()[pos].clone();
                if state.statuses.contains_key(&id) {
                    // started ahead of the cursor, already settled by its task
                    continue;
                }
                let status = if state.is_pruned(&id) { NodeRunStatus::Skipped } else { NodeRunStatus::Canceled };
                self.settle_one(&id, status, &mut state).await;
            }
        }

        self.report(state)
    }

    fn report(
        &self,
        state: RunState,
    ) -> RunReport {
        let status = if self.ctx.is_canceled() {
            RunStatus::Canceled
        } else if !state.failed.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        info!("run {} finished: {}", self.ctx.run_id(), status.as_ref());

        RunReport {
            run_id: self.ctx.run_id(),
            status,
            schedule: self.workflow.plan().schedule().clone(),
            nodes: state.latest,
            failed: state.failed,
            outputs: self.ctx.outputs(),
        }
    }

    async fn step(
        &self,
        pos: usize,
        state: &mut RunState,
        tasks: &mut Tasks,
    ) -> Step {
        let id = &self.workflow.plan().order()[pos];
        let Some(node) = self.workflow.node(id) else {
            return Step::Next;
        };
        if state.statuses.contains_key(id) {
            return Step::Next;
        }

        if state.is_pruned(id) {
            return self.settle(pos, node, NodeRunStatus::Skipped, state).await;
        }
        match self.gate(pos, id, state) {
            Gate::Wait => return Step::Wait,
            Gate::Blocked => return self.settle(pos, node, NodeRunStatus::Blocked, state).await,
            Gate::Open => {}
        }

        match node.kind {
            NodeKind::Step => {
                if tasks.len() >= self.options.max_concurrency {
                    return Step::Wait;
                }
                self.start(node, state, tasks).await;
                Step::Next
            }
            NodeKind::Conditional => {
                self.route(node, state).await;
                Step::Next
            }
            NodeKind::LoopStart => {
                self.enter_loop(node, state).await;
                Step::Next
            }
            NodeKind::LoopEnd => self.close_loop(node, state).await,
        }
    }

    /// Starts plain nodes after the waiting cursor whose dependencies are
    /// already settled. Stops at the first control node, since a loop or a
    /// branch decides what runs after it.
    async fn start_ahead(
        &self,
        cursor: usize,
        state: &mut RunState,
        tasks: &mut Tasks,
    ) {
        let plan = self.workflow.plan();
        if self.workflow.node(&plan.order()[cursor]).is_none_or(|n| n.kind != NodeKind::Step) {
            return;
        }
        for pos in cursor + 1..plan.len() {
            if tasks.len() >= self.options.max_concurrency {
                break;
            }
            let id = &plan.order()[pos];
            let Some(node) = self.workflow.node(id) else {
                continue;
            };
            if node.kind != NodeKind::Step {
                break;
            }
            if state.is_pruned(id) || state.statuses.contains_key(id) {
                continue;
            }
            if let Gate::Open = self.gate(pos, id, state) {
                debug!("node {} starts ahead of {}", id, plan.order()[cursor]);
                self.start(node, state, tasks).await;
            }
        }
    }

    /// Checks the dependencies positioned before `pos`.
    fn gate(
        &self,
        pos: usize,
        id: &str,
        state: &RunState,
    ) -> Gate {
        let plan = self.workflow.plan();
        let mut waiting = false;
        for dep in self.workflow.dependencies().of(id) {
            if !plan.position(dep).is_some_and(|p| p < pos) {
                continue;
            }
            match state.status(dep) {
                s if s.unblocks_dependents() => {}
                NodeRunStatus::Pending | NodeRunStatus::Running => waiting = true,
                _ => {
                    debug!("node {} blocked by {}", id, dep);
                    return Gate::Blocked;
                }
            }
        }
        if waiting { Gate::Wait } else { Gate::Open }
    }

    /// Settles the node at `pos` without running it. A loop-start settles its whole region.
    async fn settle(
        &self,
        pos: usize,
        node: &Node,
        status: NodeRunStatus,
        state: &mut RunState,
    ) -> Step {
        let Some(region) = self.workflow.region_started_by(&node.id).and_then(|r| self.workflow.region(r)) else {
            return Step::Jump(self.settle_one(&node.id, status, state).await);
        };
        debug!("loop region {}..{} settled as {}", region.start, region.end, status);
        let plan = self.workflow.plan().order();
        for p in pos..=region.end_pos {
            self.settle_one(&plan[p], status, state).await;
        }
        Step::Jump(region.end_pos + 1)
    }

    /// Records one node as settled and returns the position after it.
    async fn settle_one(
        &self,
        id: &NodeId,
        status: NodeRunStatus,
        state: &mut RunState,
    ) -> usize {
        let iteration = self.iteration_of(id, state);
        if let Some(r) = self.workflow.region_started_by(id) {
            // the region consumes an iteration number even when it never runs
            state.loops[r].skip();
        }
        if let Some(r) = self.workflow.region_ended_by(id) {
            state.loops[r].phase = LoopPhase::Completed;
        }

        let status = self.record(id, iteration, json!({ "settled": status.as_ref() }), NodeRunOutcome::settled(status)).await;
        state.set(id, status);
        self.workflow.plan().position(id).map(|p| p + 1).unwrap_or_default()
    }

    /// Begins a NodeRun for an ordinary node and hands it to the executor.
    async fn start(
        &self,
        node: &Node,
        state: &mut RunState,
        tasks: &mut Tasks,
    ) {
        let iteration = self.iteration_of(&node.id, state);
        let request = self.request(node, iteration, self.loop_vars_of(&node.id, state));

        let record_id = match self.recorder.begin(&request.run_id, &node.id, iteration, &request.snapshot()).await {
            Ok(record_id) => record_id,
            Err(err) => {
                error!("failed to begin node run ({}, {}): {}", node.id, iteration, err);
                self.ctx.emit(&node.id, iteration, GraphEvent::Node(NodeEvent::Failed(ErrorReason::Exception(err.to_string()))));
                state.set(&node.id, NodeRunStatus::Failed);
                return;
            }
        };

        debug!("dispatching node {} (iteration {})", node.id, iteration);
        state.set(&node.id, NodeRunStatus::Running);
        if let Some(event) = NodeEvent::from_status(NodeRunStatus::Running, None) {
            self.ctx.emit(&node.id, iteration, GraphEvent::Node(event));
        }

        let ctx = self.ctx.clone();
        let executor = self.executor.clone();
        let retry = node.retry.clone();
        let launched = Launched {
            node_id: node.id.clone(),
            record_id,
            iteration,
        };
        tasks.spawn(launched, async move {
            AssertUnwindSafe(execute(ctx, executor, request, retry))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| TaskResult::Failed("executor panicked".to_string()))
        });
    }

    async fn complete(
        &self,
        completion: Completion,
        state: &mut RunState,
    ) {
        let Completion {
            node_id,
            record_id,
            iteration,
            result,
        } = completion;
        let (outcome, output) = match result {
            TaskResult::Output(output) => (NodeRunOutcome::succeeded(&output), Some(output)),
            TaskResult::Failed(err) => (NodeRunOutcome::failed(err), None),
            TaskResult::Canceled => (NodeRunOutcome::settled(NodeRunStatus::Canceled), None),
        };

        let status = self.finish(&record_id, &node_id, iteration, outcome).await;
        if status == NodeRunStatus::Succeeded {
            if let Some(output) = output {
                self.ctx.add_output(node_id.clone(), output);
            }
        }
        debug!("node {} (iteration {}) finished: {}", node_id, iteration, status);
        state.set(&node_id, status);
    }

    /// Evaluates a conditional node and prunes the branch it did not select.
    async fn route(
        &self,
        node: &Node,
        state: &mut RunState,
    ) {
        let iteration = self.iteration_of(&node.id, state);
        let outputs = self.ctx.outputs();
        let scope = Scope::new(&outputs).with_loop(self.loop_vars_of(&node.id, state));
        let result = self.workflow.condition(&node.id).is_some_and(|c| c.evaluate(&scope));
        let port = select_port(result);

        let RunState {
            statuses,
            pruned,
            edges,
            ..
        } = &mut *state;
        let workflow = &self.workflow;
        let newly_pruned = prune_unselected(&node.id, port, workflow.outgoing(), &workflow.dependencies().incoming, edges, |id| {
            !pruned.contains_key(id) && !statuses.contains_key(id) && workflow.node(id).is_some_and(|n| n.kind != NodeKind::LoopEnd)
        });
        for id in newly_pruned {
            state.pruned.insert(id, node.id.clone());
        }

        let output = NodeOutput::json(json!({ CONDITION_RESULT: result, CONDITION_SELECTED: port }));
        let input = json!({ "inputs": self.inputs_of(&node.id, &outputs) });
        self.record_control(node, iteration, input, output, state).await;
    }

    async fn enter_loop(
        &self,
        node: &Node,
        state: &mut RunState,
    ) {
        let Some(r) = self.workflow.region_started_by(&node.id) else {
            return;
        };
        // recorded under the enclosing loop's iteration
        let iteration = self.iteration_of(&node.id, state);
        let entered = state.loops[r].enter();
        debug!("entering loop {} at iteration {}", node.id, entered);

        let output = NodeOutput::json(json!({ LOOP_ITERATION: entered, LOOP_PASS: 0 }));
        self.record_control(node, iteration, json!({ LOOP_ITERATION: entered }), output, state).await;
    }

    /// Evaluates a loop-end node once every body node has finished.
    async fn close_loop(
        &self,
        node: &Node,
        state: &mut RunState,
    ) -> Step {
        let Some((r, region)) = self.workflow.region_ended_by(&node.id).and_then(|r| self.workflow.region(r).map(|region| (r, region))) else {
            return Step::Next;
        };
        if region.body.iter().any(|id| state.is_running(id)) {
            return Step::Wait;
        }

        let vars = state.loops[r].vars();
        let outputs = self.ctx.outputs();
        let scope = Scope::new(&outputs).with_loop(Some(vars));
        let condition = region.condition.evaluate(&scope);

        state.loops[r].evaluate();
        let decision = state.loops[r].advance(region.mode, condition, region.limit(self.options.max_loop_iterations));
        let (again, limit_reached) = match decision {
            LoopDecision::Continue { .. } => (true, false),
            LoopDecision::Complete { limit_reached } => (false, limit_reached),
        };

        let output = NodeOutput::json(json!({
            LOOP_ITERATION: vars.iteration,
            LOOP_PASS: vars.pass,
            LOOP_CONTINUE: again,
            LOOP_LIMIT_REACHED: limit_reached,
        }));
        let input = json!({ CONDITION_RESULT: condition, "mode": region.mode.as_ref() });
        let status = self.record_control(node, vars.iteration, input, output, state).await;

        match decision {
            LoopDecision::Continue { iteration } if status == NodeRunStatus::Succeeded => {
                debug!("loop {} continues with iteration {}", region.start, iteration);
                // branch decisions made outside the region still hold
                state.reset(region.body.iter().chain(std::iter::once(&region.end)));
                for child in self.workflow.descendant_regions(r) {
                    state.loops[child].reset();
                }
                self.ctx.add_output(region.start.clone(), NodeOutput::json(json!({ LOOP_ITERATION: iteration, LOOP_PASS: state.loops[r].pass })));
                Step::Jump(region.start_pos + 1)
            }
            LoopDecision::Continue { .. } => {
                state.loops[r].phase = LoopPhase::Completed;
                Step::Next
            }
            LoopDecision::Complete { limit_reached } => {
                if limit_reached {
                    warn!("loop {} stopped after {} passes, iteration limit reached", region.start, vars.pass + 1);
                }
                Step::Next
            }
        }
    }

    /// Records a control node that succeeded and publishes its output.
    async fn record_control(
        &self,
        node: &Node,
        iteration: u32,
        input: Value,
        output: NodeOutput,
        state: &mut RunState,
    ) -> NodeRunStatus {
        let status = self.record(&node.id, iteration, input, NodeRunOutcome::succeeded(&output)).await;
        if status == NodeRunStatus::Succeeded {
            self.ctx.add_output(node.id.clone(), output);
        }
        state.set(&node.id, status);
        status
    }

    /// Begins and finishes a NodeRun in one go. Recorder failures fail the node.
    async fn record(
        &self,
        id: &str,
        iteration: u32,
        input: Value,
        outcome: NodeRunOutcome,
    ) -> NodeRunStatus {
        match self.recorder.begin(&self.ctx.run_id(), id, iteration, &input).await {
            Ok(record_id) => self.finish(&record_id, id, iteration, outcome).await,
            Err(err) => {
                error!("failed to begin node run ({}, {}): {}", id, iteration, err);
                self.ctx.emit(id, iteration, GraphEvent::Node(NodeEvent::Failed(ErrorReason::Exception(err.to_string()))));
                NodeRunStatus::Failed
            }
        }
    }

    async fn finish(
        &self,
        record_id: &str,
        id: &str,
        iteration: u32,
        outcome: NodeRunOutcome,
    ) -> NodeRunStatus {
        let status = outcome.status;
        let error = outcome.error.clone();
        if let Err(err) = self.recorder.finish(record_id, outcome).await {
            error!("failed to finish node run ({}, {}): {}", id, iteration, err);
            self.ctx.emit(id, iteration, GraphEvent::Node(NodeEvent::Failed(ErrorReason::Exception(err.to_string()))));
            return NodeRunStatus::Failed;
        }
        if let Some(event) = NodeEvent::from_status(status, error) {
            self.ctx.emit(id, iteration, GraphEvent::Node(event));
        }
        status
    }

    fn request(
        &self,
        node: &Node,
        iteration: u32,
        loop_vars: Option<LoopVars>,
    ) -> ExecutionRequest {
        let outputs = self.ctx.outputs();
        let scope = Scope::new(&outputs).with_loop(loop_vars);
        ExecutionRequest {
            run_id: self.ctx.run_id(),
            node: node.clone(),
            iteration,
            loop_vars,
            prompt: node.prompt.as_deref().map(|p| template::render_lenient(&scope, p)),
            inputs: self.inputs_of(&node.id, &outputs),
        }
    }

    fn inputs_of(
        &self,
        id: &str,
        outputs: &BTreeMap<NodeId, NodeOutput>,
    ) -> BTreeMap<NodeId, NodeOutput> {
        self.workflow.dependencies().of(id).filter_map(|dep| outputs.get(dep).map(|o| (dep.clone(), o.clone()))).collect()
    }

    /// NodeRun iteration: the innermost enclosing loop's current iteration,
    /// or the region's own iteration for a loop-end.
    fn iteration_of(
        &self,
        id: &str,
        state: &RunState,
    ) -> u32 {
        if let Some(r) = self.workflow.region_ended_by(id) {
            return state.loops[r].iteration;
        }
        self.workflow.innermost_region(id).map(|r| state.loops[r].iteration).unwrap_or(0)
    }

    fn loop_vars_of(
        &self,
        id: &str,
        state: &RunState,
    ) -> Option<LoopVars> {
        self.workflow.innermost_region(id).map(|r| state.loops[r].vars())
    }
}

/// Runs the executor, retrying failed attempts per the node's retry policy.
async fn execute(
    ctx: Arc<Context>,
    executor: Arc<dyn NodeExecutor>,
    request: ExecutionRequest,
    retry: Option<RetryConfig>,
) -> TaskResult {
    let mut retry_times = retry.as_ref().map(|r| r.times).unwrap_or(0);
    let iteration = request.iteration;
    let node_id = request.node.id.clone();

    loop {
        let attempt = tokio::select! {
            biased;
            _ = ctx.wait_canceled() => return TaskResult::Canceled,
            res = executor.execute(ctx.clone(), request.clone()) => res,
        };

        match attempt {
            Ok(output) => return TaskResult::Output(output),
            Err(err) if retry_times > 0 => {
                retry_times -= 1;
                debug!("node {} failed ({}), {} retries left", node_id, err, retry_times);
                ctx.emit(&node_id, iteration, GraphEvent::Node(NodeEvent::Retry));
                if let Some(interval) = retry.as_ref().map(RetryConfig::interval).filter(|d| !d.is_zero()) {
                    tokio::select! {
                        _ = ctx.wait_canceled() => return TaskResult::Canceled,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
            Err(err) => return TaskResult::Failed(err.to_string()),
        }
    }
}
