use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::runtime::Handle;

use crate::{
    MemRecorder, Result, StepflowError,
    dispatcher::{DispatchOptions, Dispatcher},
    model::{EdgeModel, GraphModel, NodeModel},
    runtime::{Channel, Context, ExecutionRequest, NodeExecutor, NodeOutput, RunReport, RunStatus},
    store::{NodeRunOutcome, NodeRunRecorder, RecordId},
    workflow::{NodeRunStatus, Workflow},
};

const RUN_ID: &str = "run-1";

/// Executor driven by per-node scripts.
#[derive(Default)]
struct Script {
    /// number of leading attempts that fail
    failures: HashMap<String, usize>,
    delays: HashMap<String, Duration>,
    outputs: HashMap<String, String>,

    /// (node, iteration, prompt) in call order
    calls: Mutex<Vec<(String, u32, String)>>,
    attempts: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Script {
    fn fail(
        mut self,
        id: &str,
        times: usize,
    ) -> Self {
        self.failures.insert(id.to_string(), times);
        self
    }

    fn delay(
        mut self,
        id: &str,
        delay: Duration,
    ) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    fn output(
        mut self,
        id: &str,
        text: &str,
    ) -> Self {
        self.outputs.insert(id.to_string(), text.to_string());
        self
    }

    fn called(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().iter().map(|(id, iteration, _)| (id.clone(), *iteration)).collect()
    }

    fn prompts(
        &self,
        id: &str,
    ) -> Vec<String> {
        self.calls.lock().unwrap().iter().filter(|(n, _, _)| n == id).map(|(_, _, prompt)| prompt.clone()).collect()
    }

    fn attempts(
        &self,
        id: &str,
    ) -> usize {
        self.attempts.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl NodeExecutor for Script {
    async fn execute(
        &self,
        _ctx: Arc<Context>,
        request: ExecutionRequest,
    ) -> Result<NodeOutput> {
        let id = request.node.id.clone();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id.clone()).or_default();
            *n += 1;
            *n
        };
        if attempt == 1 {
            self.calls.lock().unwrap().push((id.clone(), request.iteration, request.prompt.clone().unwrap_or_default()));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(&id) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if attempt <= self.failures.get(&id).copied().unwrap_or(0) {
            return Err(StepflowError::Executor(format!("{} attempt {} failed", id, attempt)));
        }
        let text = self.outputs.get(&id).cloned().unwrap_or_else(|| format!("{}#{}", id, request.iteration));
        Ok(NodeOutput::text(text))
    }
}

/// Rejects every NodeRun of one node.
struct RejectingRecorder {
    inner: MemRecorder,
    reject: String,
}

#[async_trait]
impl NodeRunRecorder for RejectingRecorder {
    async fn begin(
        &self,
        run_id: &str,
        node_id: &str,
        iteration: u32,
        input: &Value,
    ) -> Result<RecordId> {
        if node_id == self.reject {
            return Err(StepflowError::Recorder("storage unavailable".into()));
        }
        self.inner.begin(run_id, node_id, iteration, input).await
    }

    async fn finish(
        &self,
        record_id: &str,
        outcome: NodeRunOutcome,
    ) -> Result<()> {
        self.inner.finish(record_id, outcome).await
    }
}

fn dispatcher(
    model: &GraphModel,
    script: Arc<Script>,
    recorder: Arc<dyn NodeRunRecorder>,
    options: DispatchOptions,
) -> (Dispatcher, Arc<Context>) {
    let workflow = Arc::new(Workflow::try_from(model).unwrap());
    let ctx = Arc::new(Context::new(RUN_ID.into(), Arc::new(Channel::new(Handle::current()))));
    (Dispatcher::new(ctx.clone(), workflow, script, recorder, options), ctx)
}

async fn run(
    model: &GraphModel,
    script: Arc<Script>,
    recorder: &MemRecorder,
) -> RunReport {
    let (dispatcher, _) = dispatcher(model, script, Arc::new(recorder.clone()), DispatchOptions::default());
    dispatcher.run().await
}

/// (node, iteration, status) of every record in begin order.
fn records(recorder: &MemRecorder) -> Vec<(String, u32, NodeRunStatus)> {
    recorder.records(RUN_ID).into_iter().map(|r| (r.node_id, r.iteration, r.status)).collect()
}

fn rec(
    id: &str,
    iteration: u32,
    status: NodeRunStatus,
) -> (String, u32, NodeRunStatus) {
    (id.to_string(), iteration, status)
}

fn calls(ids: &[(&str, u32)]) -> Vec<(String, u32)> {
    ids.iter().map(|(id, iteration)| (id.to_string(), *iteration)).collect()
}

fn chain(ids: &[&str]) -> Vec<EdgeModel> {
    ids.windows(2).map(|w| EdgeModel::new(w[0], w[1])).collect()
}

fn branch(
    source: &str,
    target: &str,
    port: &str,
) -> EdgeModel {
    EdgeModel::new(source, target).with_ports(Some(port), None)
}

#[tokio::test]
async fn test_runs_in_plan_order() {
    let model = GraphModel::new(
        vec![NodeModel::new("C").with_prompt("{{nodes.A}} and {{nodes.B}}"), NodeModel::new("B"), NodeModel::new("A")],
        Some(vec![EdgeModel::new("A", "C"), EdgeModel::new("B", "C")]),
    );
    let script = Arc::new(Script::default().output("A", "hello").output("B", "world"));
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert!(!report.schedule.is_fallback());
    assert_eq!(script.called(), calls(&[("A", 0), ("B", 0), ("C", 0)]));
    assert_eq!(script.prompts("C"), vec!["hello and world"]);
    assert_eq!(
        records(&recorder),
        vec![rec("A", 0, NodeRunStatus::Succeeded), rec("B", 0, NodeRunStatus::Succeeded), rec("C", 0, NodeRunStatus::Succeeded)]
    );

    let c = recorder.find(RUN_ID, "C", 0).unwrap();
    assert_eq!(c.input["inputs"]["A"]["text"], json!("hello"));
    assert_eq!(c.output_text.as_deref(), Some("C#0"));
    assert_eq!(report.outputs["C"], NodeOutput::text("C#0"));
}

#[tokio::test]
async fn test_loop_runs_body_per_iteration() {
    let model = GraphModel::new(
        vec![
            NodeModel::new("ls").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(2)),
            NodeModel::new("b1").with_prompt("pass {{loop.pass}}"),
            NodeModel::new("b2"),
            NodeModel::new("b3"),
            NodeModel::new("le").with_kind("loop-end"),
            NodeModel::new("done"),
        ],
        Some(chain(&["ls", "b1", "b2", "b3", "le", "done"])),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("b1", 0), ("b2", 0), ("b3", 0), ("b1", 1), ("b2", 1), ("b3", 1), ("done", 0)]));
    assert_eq!(script.prompts("b1"), vec!["pass 0", "pass 1"]);

    let body: Vec<_> = records(&recorder).into_iter().filter(|(id, _, _)| id.starts_with('b')).collect();
    assert_eq!(body.len(), 6);
    assert!(body.iter().all(|(_, _, status)| *status == NodeRunStatus::Succeeded));
    assert!(recorder.find(RUN_ID, "ls", 0).is_some());
    assert!(recorder.find(RUN_ID, "ls", 1).is_none());
    assert!(recorder.find(RUN_ID, "le", 1).is_some());

    let end = report.outputs["le"].json.clone().unwrap();
    assert_eq!(end["pass"], json!(1));
    assert_eq!(end["continue"], json!(false));
    assert_eq!(end["limitReached"], json!(true));
}

#[tokio::test]
async fn test_until_loop_stops_on_condition() {
    let condition = json!({
        "conditions": [{ "variableSelector": "{{loop.pass}}", "comparisonOperator": "ge", "value": 2 }]
    });
    let model = GraphModel::new(
        vec![
            NodeModel::new("ls").with_kind("loop-start").with_config("mode", json!("until")).with_config("condition", condition),
            NodeModel::new("body"),
            NodeModel::new("le").with_kind("loop-end"),
        ],
        Some(chain(&["ls", "body", "le"])),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(script.called(), calls(&[("body", 0), ("body", 1), ("body", 2)]));
    assert_eq!(report.outputs["le"].json.as_ref().unwrap()["limitReached"], json!(false));
}

#[tokio::test]
async fn test_nested_loops_keep_record_keys_unique() {
    let model = GraphModel::new(
        vec![
            NodeModel::new("outer").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(2)),
            NodeModel::new("inner").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(2)),
            NodeModel::new("x"),
            NodeModel::new("inner-end").with_kind("loop-end"),
            NodeModel::new("outer-end").with_kind("loop-end"),
        ],
        Some(chain(&["outer", "inner", "x", "inner-end", "outer-end"])),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("x", 0), ("x", 1), ("x", 2), ("x", 3)]));

    let all = records(&recorder);
    let inner_starts: Vec<u32> = all.iter().filter(|(id, _, _)| id == "inner").map(|(_, i, _)| *i).collect();
    assert_eq!(inner_starts, vec![0, 1]);
    let outer_ends: Vec<u32> = all.iter().filter(|(id, _, _)| id == "outer-end").map(|(_, i, _)| *i).collect();
    assert_eq!(outer_ends, vec![0, 1]);
    assert!(all.iter().all(|(_, _, status)| *status == NodeRunStatus::Succeeded));
}

#[tokio::test]
async fn test_unselected_branch_is_skipped() {
    let condition = json!({
        "conditions": [{ "variableSelector": "{{nodes.start}}", "comparisonOperator": "contains", "value": "yes" }]
    });
    let model = GraphModel::new(
        vec![
            NodeModel::new("start"),
            NodeModel::new("check").with_kind("conditional").with_config("condition", condition),
            NodeModel::new("t"),
            NodeModel::new("f"),
            NodeModel::new("f2"),
            NodeModel::new("join"),
        ],
        Some(vec![
            EdgeModel::new("start", "check"),
            branch("check", "t", "cond-true"),
            branch("check", "f", "cond-false"),
            EdgeModel::new("f", "f2"),
            EdgeModel::new("t", "join"),
            EdgeModel::new("f2", "join"),
        ]),
    );
    let script = Arc::new(Script::default().output("start", "yes please"));
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("start", 0), ("t", 0), ("join", 0)]));
    assert_eq!(
        records(&recorder),
        vec![
            rec("start", 0, NodeRunStatus::Succeeded),
            rec("check", 0, NodeRunStatus::Succeeded),
            rec("f", 0, NodeRunStatus::Skipped),
            rec("f2", 0, NodeRunStatus::Skipped),
            rec("t", 0, NodeRunStatus::Succeeded),
            rec("join", 0, NodeRunStatus::Succeeded),
        ]
    );
    assert_eq!(report.outputs["check"].json, Some(json!({ "result": true, "selected": "cond-true" })));
}

#[tokio::test]
async fn test_pruned_loop_region_is_skipped_whole() {
    let model = GraphModel::new(
        vec![
            NodeModel::new("gate").with_kind("conditional").with_config("condition", json!(true)),
            NodeModel::new("other"),
            NodeModel::new("ls").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(3)),
            NodeModel::new("body"),
            NodeModel::new("le").with_kind("loop-end"),
            NodeModel::new("after"),
        ],
        Some(vec![
            branch("gate", "other", "cond-true"),
            branch("gate", "ls", "cond-false"),
            EdgeModel::new("ls", "body"),
            EdgeModel::new("body", "le"),
            EdgeModel::new("le", "after"),
        ]),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("after", 0), ("other", 0)]));
    assert_eq!(
        records(&recorder),
        vec![
            rec("gate", 0, NodeRunStatus::Succeeded),
            rec("ls", 0, NodeRunStatus::Skipped),
            rec("body", 0, NodeRunStatus::Skipped),
            rec("le", 0, NodeRunStatus::Skipped),
            rec("after", 0, NodeRunStatus::Succeeded),
            rec("other", 0, NodeRunStatus::Succeeded),
        ]
    );
}

#[tokio::test]
async fn test_failure_blocks_dependents_only() {
    let model = GraphModel::new(vec![NodeModel::new("a"), NodeModel::new("b"), NodeModel::new("c")], Some(vec![EdgeModel::new("a", "b")]));
    let script = Arc::new(Script::default().fail("a", usize::MAX));
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed, vec!["a"]);
    assert_eq!(report.nodes["b"], NodeRunStatus::Blocked);
    assert_eq!(report.nodes["c"], NodeRunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("a", 0), ("c", 0)]));

    let a = recorder.find(RUN_ID, "a", 0).unwrap();
    assert_eq!(a.err.as_deref(), Some("a attempt 1 failed"));
    assert_eq!(recorder.find(RUN_ID, "b", 0).unwrap().status, NodeRunStatus::Blocked);
}

#[tokio::test]
async fn test_retry_policy() {
    let retry = json!({ "times": 2, "interval": 0 });
    let model = GraphModel::new(
        vec![NodeModel::new("flaky").with_config("retry", retry.clone()), NodeModel::new("broken").with_config("retry", json!({ "times": 1 }))],
        None,
    );
    let script = Arc::new(Script::default().fail("flaky", 2).fail("broken", 2));
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(script.attempts("flaky"), 3);
    assert_eq!(script.attempts("broken"), 2);
    assert_eq!(report.nodes["flaky"], NodeRunStatus::Succeeded);
    assert_eq!(report.nodes["broken"], NodeRunStatus::Failed);
    // one record per node no matter how many attempts
    assert_eq!(recorder.len(), 2);
}

#[tokio::test]
async fn test_cancel_settles_remaining_nodes() {
    let model = GraphModel::new(vec![NodeModel::new("slow"), NodeModel::new("next")], Some(vec![EdgeModel::new("slow", "next")]));
    let script = Arc::new(Script::default().delay("slow", Duration::from_secs(30)));
    let recorder = MemRecorder::new();
    let (dispatcher, ctx) = dispatcher(&model, script, Arc::new(recorder.clone()), DispatchOptions::default());

    let (report, _) = tokio::join!(dispatcher.run(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();
    });

    assert_eq!(report.status, RunStatus::Canceled);
    assert_eq!(records(&recorder), vec![rec("slow", 0, NodeRunStatus::Canceled), rec("next", 0, NodeRunStatus::Canceled)]);
}

#[tokio::test]
async fn test_cycle_falls_back_to_declaration_order() {
    let model = GraphModel::new(
        vec![NodeModel::new("b"), NodeModel::new("a"), NodeModel::new("c")],
        Some(vec![EdgeModel::new("a", "b"), EdgeModel::new("b", "a")]),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert!(report.schedule.is_fallback());
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("b", 0), ("a", 0), ("c", 0)]));
}

#[tokio::test]
async fn test_concurrency_limit() {
    let ids = ["n1", "n2", "n3", "n4", "n5", "n6"];
    let model = GraphModel::new(ids.iter().map(|id| NodeModel::new(id)).collect(), None);
    let script = ids.iter().fold(Script::default(), |s, id| s.delay(id, Duration::from_millis(20)));
    let script = Arc::new(script);
    let recorder = MemRecorder::new();
    let options = DispatchOptions {
        max_concurrency: 2,
        ..Default::default()
    };
    let (dispatcher, _) = dispatcher(&model, script.clone(), Arc::new(recorder.clone()), options);
    let report = dispatcher.run().await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called().len(), 6);
    assert_eq!(script.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_recorder_failure_fails_node() {
    let model = GraphModel::new(vec![NodeModel::new("a"), NodeModel::new("b"), NodeModel::new("c")], Some(chain(&["a", "b", "c"])));
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let rejecting = Arc::new(RejectingRecorder {
        inner: recorder.clone(),
        reject: "b".into(),
    });
    let (dispatcher, _) = dispatcher(&model, script.clone(), rejecting, DispatchOptions::default());
    let report = dispatcher.run().await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed, vec!["b"]);
    assert_eq!(report.nodes["c"], NodeRunStatus::Blocked);
    assert_eq!(script.called(), calls(&[("a", 0)]));
    assert_eq!(records(&recorder), vec![rec("a", 0, NodeRunStatus::Succeeded), rec("c", 0, NodeRunStatus::Blocked)]);
}

#[tokio::test]
async fn test_independent_node_starts_while_dependency_runs() {
    let model = GraphModel::new(vec![NodeModel::new("a"), NodeModel::new("b"), NodeModel::new("c")], Some(vec![EdgeModel::new("a", "b")]));
    let script = Arc::new(Script::default().delay("a", Duration::from_millis(100)).delay("c", Duration::from_millis(100)));
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    // c does not wait behind b, which waits on a
    assert_eq!(script.called(), calls(&[("a", 0), ("c", 0), ("b", 0)]));
    assert_eq!(script.peak.load(Ordering::SeqCst), 2);
    assert_eq!(
        records(&recorder),
        vec![rec("a", 0, NodeRunStatus::Succeeded), rec("c", 0, NodeRunStatus::Succeeded), rec("b", 0, NodeRunStatus::Succeeded)]
    );
}

#[tokio::test]
async fn test_branch_inside_loop_decides_per_iteration() {
    let condition = json!({
        "conditions": [{ "variableSelector": "{{loop.pass}}", "comparisonOperator": "ge", "value": 1 }]
    });
    let model = GraphModel::new(
        vec![
            NodeModel::new("ls").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(2)),
            NodeModel::new("check").with_kind("conditional").with_config("condition", condition),
            NodeModel::new("early"),
            NodeModel::new("late"),
            NodeModel::new("join"),
            NodeModel::new("le").with_kind("loop-end"),
        ],
        Some(vec![
            EdgeModel::new("ls", "check"),
            branch("check", "late", "cond-true"),
            branch("check", "early", "cond-false"),
            EdgeModel::new("early", "join"),
            EdgeModel::new("late", "join"),
            EdgeModel::new("join", "le"),
        ]),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("early", 0), ("join", 0), ("late", 1), ("join", 1)]));
    assert_eq!(
        records(&recorder),
        vec![
            rec("ls", 0, NodeRunStatus::Succeeded),
            rec("check", 0, NodeRunStatus::Succeeded),
            rec("early", 0, NodeRunStatus::Succeeded),
            rec("late", 0, NodeRunStatus::Skipped),
            rec("join", 0, NodeRunStatus::Succeeded),
            rec("le", 0, NodeRunStatus::Succeeded),
            rec("check", 1, NodeRunStatus::Succeeded),
            rec("early", 1, NodeRunStatus::Skipped),
            rec("late", 1, NodeRunStatus::Succeeded),
            rec("join", 1, NodeRunStatus::Succeeded),
            rec("le", 1, NodeRunStatus::Succeeded),
        ]
    );
    assert_eq!(report.outputs["check"].json, Some(json!({ "result": true, "selected": "cond-true" })));
}

#[tokio::test]
async fn test_branch_outside_loop_prunes_every_iteration() {
    let model = GraphModel::new(
        vec![
            NodeModel::new("check").with_kind("conditional").with_config("condition", json!(true)),
            NodeModel::new("yes"),
            NodeModel::new("ls").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(2)),
            NodeModel::new("no").with_prompt("{{nodes.ls}}"),
            NodeModel::new("le").with_kind("loop-end").with_prompt("{{nodes.no}}"),
        ],
        Some(vec![branch("check", "yes", "cond-true"), branch("check", "no", "cond-false")]),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("yes", 0)]));
    assert_eq!(
        records(&recorder),
        vec![
            rec("check", 0, NodeRunStatus::Succeeded),
            rec("ls", 0, NodeRunStatus::Succeeded),
            rec("no", 0, NodeRunStatus::Skipped),
            rec("le", 0, NodeRunStatus::Succeeded),
            rec("no", 1, NodeRunStatus::Skipped),
            rec("le", 1, NodeRunStatus::Succeeded),
            rec("yes", 0, NodeRunStatus::Succeeded),
        ]
    );
    assert_eq!(report.nodes["no"], NodeRunStatus::Skipped);
}

#[tokio::test]
async fn test_cancel_inside_loop() {
    let model = GraphModel::new(
        vec![
            NodeModel::new("ls").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(5)),
            NodeModel::new("work"),
            NodeModel::new("le").with_kind("loop-end"),
            NodeModel::new("after"),
        ],
        Some(chain(&["ls", "work", "le", "after"])),
    );
    let script = Arc::new(Script::default().delay("work", Duration::from_millis(100)));
    let recorder = MemRecorder::new();
    let (dispatcher, ctx) = dispatcher(&model, script.clone(), Arc::new(recorder.clone()), DispatchOptions::default());

    let (report, _) = tokio::join!(dispatcher.run(), async {
        tokio::time::sleep(Duration::from_millis(150)).await;
        ctx.cancel();
    });

    assert_eq!(report.status, RunStatus::Canceled);
    assert_eq!(script.called(), calls(&[("work", 0), ("work", 1)]));
    assert_eq!(
        records(&recorder),
        vec![
            rec("ls", 0, NodeRunStatus::Succeeded),
            rec("work", 0, NodeRunStatus::Succeeded),
            rec("le", 0, NodeRunStatus::Succeeded),
            rec("work", 1, NodeRunStatus::Canceled),
            rec("le", 1, NodeRunStatus::Canceled),
            rec("after", 0, NodeRunStatus::Canceled),
        ]
    );
}

#[tokio::test]
async fn test_unrelated_node_between_loop_markers_runs_once() {
    let model = GraphModel::new(
        vec![
            NodeModel::new("a_ls").with_kind("loop-start").with_config("condition", json!(true)).with_config("maxIterations", json!(3)),
            NodeModel::new("b"),
            NodeModel::new("bb"),
            NodeModel::new("c_le").with_kind("loop-end"),
        ],
        Some(chain(&["a_ls", "b", "c_le"])),
    );
    let script = Arc::new(Script::default());
    let recorder = MemRecorder::new();
    let report = run(&model, script.clone(), &recorder).await;

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(script.called(), calls(&[("b", 0), ("b", 1), ("b", 2), ("bb", 0)]));
    let bb: Vec<_> = records(&recorder).into_iter().filter(|(id, _, _)| id == "bb").collect();
    assert_eq!(bb, vec![rec("bb", 0, NodeRunStatus::Succeeded)]);
}
