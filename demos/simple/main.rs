use std::sync::Arc;

use async_trait::async_trait;
use stepflow::{ChannelEvent, ChannelOptions, Config, Context, EngineBuilder, ExecutionRequest, GraphModel, MemRecorder, NodeExecutor, NodeOutput, Result};

/// Echoes the rendered prompt back, standing in for a model call.
struct EchoExecutor;

#[async_trait]
impl NodeExecutor for EchoExecutor {
    async fn execute(
        &self,
        _ctx: Arc<Context>,
        request: ExecutionRequest,
    ) -> Result<NodeOutput> {
        let prompt = request.prompt.unwrap_or_default();
        Ok(NodeOutput::text(format!("[{}] {}", request.node.id, prompt)))
    }
}

fn main() {
    let config = Config::load_from_str(include_str!("./config.toml")).unwrap();
    let recorder = Arc::new(MemRecorder::new());

    let engine = EngineBuilder::new().config(config).executor(Arc::new(EchoExecutor)).recorder(recorder.clone()).build().unwrap();
    engine.launch();

    let graph = GraphModel::from_json(include_str!("./workflow.json")).unwrap();
    let run = engine.build_run(&graph).unwrap();
    let run_id = run.id().to_string();

    let events = ChannelEvent::channel(engine.channel(), ChannelOptions::with_run_id(run_id.clone())).unwrap();
    events.on_complete(move |run_id| {
        println!("Run completed, id: {}", run_id);
    });
    events.on_error(move |e| {
        println!("Run failed: {:?}", e);
    });

    engine.run(run.clone()).unwrap();
    let report = engine.wait(&run).unwrap();

    println!("Plan: {:?}", report.schedule.order());
    for record in recorder.records(&run_id) {
        println!("{:>12} #{} {}", record.node_id, record.iteration, record.status);
    }
    println!("Report: {}", serde_json::to_string_pretty(&report).unwrap());

    engine.shutdown();
}
