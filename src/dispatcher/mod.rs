mod dispatcher;
mod state;
mod tasks;

pub use dispatcher::{DispatchOptions, Dispatcher};

#[cfg(test)]
mod tests;
