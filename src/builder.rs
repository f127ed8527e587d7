use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};

use crate::{Config, Engine, MemRecorder, NodeExecutor, NodeRunRecorder, Result, StepflowError};

/// Assembles an [`Engine`]. Only the executor is mandatory; the recorder
/// defaults to an in-memory [`MemRecorder`].
#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    rt: Option<Arc<Runtime>>,
    executor: Option<Arc<dyn NodeExecutor>>,
    recorder: Option<Arc<dyn NodeRunRecorder>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn async_worker_thread_number(
        mut self,
        n: u16,
    ) -> Self {
        self.config.async_worker_thread_number = n;
        self
    }

    pub fn max_concurrency(
        mut self,
        n: usize,
    ) -> Self {
        self.config.max_concurrency = n.max(1);
        self
    }

    pub fn max_loop_iterations(
        mut self,
        n: u32,
    ) -> Self {
        self.config.max_loop_iterations = n;
        self
    }

    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    pub fn executor(
        mut self,
        executor: Arc<dyn NodeExecutor>,
    ) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn recorder(
        mut self,
        recorder: Arc<dyn NodeRunRecorder>,
    ) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn build(&self) -> Result<Engine> {
        let executor = self.executor.clone().ok_or_else(|| StepflowError::Engine("a node executor is required".to_string()))?;
        let recorder = self.recorder.clone().unwrap_or_else(|| Arc::new(MemRecorder::new()));
        let runtime = match &self.rt {
            Some(rt) => rt.clone(),
            None => Arc::new(Builder::new_multi_thread().worker_threads(self.config.async_worker_thread_number.max(1).into()).enable_all().build()?),
        };

        Ok(Engine::new(runtime, executor, recorder, self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{Context, ExecutionRequest, NodeOutput};

    struct Noop;

    #[async_trait]
    impl NodeExecutor for Noop {
        async fn execute(
            &self,
            _ctx: Arc<Context>,
            _request: ExecutionRequest,
        ) -> Result<NodeOutput> {
            Ok(NodeOutput::default())
        }
    }

    #[test]
    fn test_executor_required() {
        assert!(matches!(EngineBuilder::new().build(), Err(StepflowError::Engine(_))));
    }

    #[test]
    fn test_settings_reach_config() {
        let engine = EngineBuilder::new().async_worker_thread_number(2).max_concurrency(0).max_loop_iterations(7).executor(Arc::new(Noop)).build().unwrap();
        assert_eq!(engine.config().max_concurrency, 1);
        assert_eq!(engine.config().max_loop_iterations, 7);
        assert_eq!(engine.config().async_worker_thread_number, 2);
    }
}
