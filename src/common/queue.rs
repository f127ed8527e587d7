//! Message queues for inter-component communication.
//!
//! Provides both point-to-point (Queue) and broadcast (BroadcastQueue) messaging.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{Result, StepflowError};

/// Bounded MPMC queue backed by flume.
///
/// Used for notifications that must be consumed exactly once, such as the
/// engine's finished-run queue.
pub struct Queue<T> {
    receiver: flume::Receiver<T>,
    sender: flume::Sender<T>,
}

#[allow(unused)]
impl<T> Queue<T> {
    pub fn new(cap: usize) -> Arc<Self> {
        let (sender, receiver) = flume::bounded(cap);

        Arc::new(Self {
            receiver,
            sender,
        })
    }

    pub fn try_next(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub fn send(
        &self,
        msg: T,
    ) -> Result<()> {
        self.sender.try_send(msg).map_err(|e| StepflowError::Queue(e.to_string()))
    }

    pub async fn next_async(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }
}

/// Broadcast queue for one-to-many message distribution.
///
/// Every subscriber receives every message sent after it subscribed.
pub struct BroadcastQueue<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> BroadcastQueue<T> {
    pub fn new(cap: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(cap);

        Arc::new(Self {
            sender,
        })
    }

    /// Publishes a message; having no subscribers is not an error.
    pub fn send(
        &self,
        msg: T,
    ) -> usize {
        self.sender.send(msg).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_bounded() {
        let queue = Queue::new(1);
        queue.send(1).unwrap();
        assert!(queue.send(2).is_err());
        assert_eq!(queue.try_next(), Some(1));
        assert_eq!(queue.try_next(), None);
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let queue = BroadcastQueue::new(4);
        let mut a = queue.subscribe();
        let mut b = queue.subscribe();
        assert_eq!(queue.send("hello"), 2);
        assert_eq!(a.recv().await.unwrap(), "hello");
        assert_eq!(b.recv().await.unwrap(), "hello");
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let queue = BroadcastQueue::new(4);
        assert_eq!(queue.send(1u8), 0);
    }
}
