//! One-shot termination signal shared between a run and its workers.

use std::future::Future;

use tokio::sync::watch;

pub struct Shutdown {
    state: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state,
        }
    }

    /// Trips the signal. Calling it again has no effect.
    pub fn shutdown(&self) {
        self.state.send_replace(true);
    }

    pub fn is_terminated(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once [`Shutdown::shutdown`] has been called, immediately if it already was.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.state.subscribe();
        async move {
            let _ = rx.wait_for(|terminated| *terminated).await;
        }
    }
}
