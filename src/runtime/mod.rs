mod channel;
mod context;
mod executor;
mod run;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use context::Context;
pub use executor::{ExecutionRequest, NodeExecutor, NodeOutput};
pub use run::{Run, RunId, RunReport, RunStatus};
