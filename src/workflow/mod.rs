pub mod branch;
pub mod condition;
pub mod consts;
pub mod dependency;
pub mod edge;
pub mod loops;
pub mod node;
pub mod normalize;
pub mod schedule;
pub mod template;
mod workflow;

pub use dependency::DependencySet;
pub use edge::Edge;
pub use loops::{LoopMode, LoopRegion};
pub use node::{NodeId, NodeKind, NodeRunStatus};
pub use normalize::NormalizedGraph;
pub use schedule::{ExecutionPlan, Schedule};
pub use workflow::Workflow;
