//! # Stepflow
//!
//! Stepflow is a deterministic workflow graph engine for prompt pipelines.
//! A user-authored graph of nodes (prompt steps, conditionals, loops) is
//! normalized, its dependencies are inferred from both explicit edges and
//! `{{nodes.<id>}}` template references, and the nodes are executed in a
//! reproducible order against an external [`NodeExecutor`].
//!
//! ## Core Features
//!
//! - **Permissive Normalization**: malformed edges are dropped, never rejected
//! - **Deterministic Scheduling**: Kahn's algorithm with lexicographic tie-break
//! - **Loops and Branches**: `while`/`until` loop regions and `cond-true`/`cond-false` branches
//! - **Async Execution**: Powered by `tokio`, bounded by a configurable concurrency limit
//! - **Pluggable Recording**: every execution attempt is reported to a [`NodeRunRecorder`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stepflow::{EngineBuilder, GraphModel, MemRecorder};
//!
//! let engine = EngineBuilder::new().executor(my_executor).recorder(Arc::new(MemRecorder::new())).build()?;
//! engine.launch();
//!
//! let graph = GraphModel::from_json(json_str)?;
//! let run = engine.build_run(&graph)?;
//! engine.run(run.clone())?;
//! let report = engine.wait(&run);
//! ```

mod builder;
mod common;
mod config;
mod dispatcher;
mod engine;
mod error;
mod events;
mod model;
mod runtime;
mod store;
mod utils;
mod workflow;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use config::Config;
pub use dispatcher::DispatchOptions;
pub use engine::Engine;
pub use error::StepflowError;
pub use events::{ErrorReason, Event, GraphEvent, Message, NodeEvent, RunEvent};
pub use model::*;
pub use runtime::{Channel, ChannelEvent, ChannelOptions, Context, ExecutionRequest, NodeExecutor, NodeOutput, Run, RunId, RunReport, RunStatus};
pub use store::{MemRecorder, NodeRunOutcome, NodeRunRecorder, RecordId, data::NodeRun};
pub use workflow::{
    DependencySet, Edge, ExecutionPlan, LoopMode, LoopRegion, NodeId, NodeKind, NodeRunStatus, NormalizedGraph, Schedule, Workflow,
    dependency::resolve_dependencies, normalize::normalize, schedule::schedule,
};

/// Result type alias for Stepflow operations.
pub type Result<T> = std::result::Result<T, StepflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
