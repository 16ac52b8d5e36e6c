//! Pending notification queues.
//!
//! Notifications for identities without a live connection are kept here
//! until the identity collects them. Only the most recent entries survive.

use crate::error::BackendError;
use async_trait::async_trait;
use dashmap::DashMap;
use herald_protocol::{Identity, Notification};
use std::collections::VecDeque;
use tracing::debug;

/// Default number of notifications retained per identity.
pub const DEFAULT_RETAIN: usize = 100;

/// Per-identity store of undelivered notifications.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    /// Queue a notification for its recipient, evicting the oldest entry
    /// once the retention limit is reached.
    async fn enqueue(&self, notification: Notification) -> Result<(), BackendError>;

    /// Remove and return every queued notification for `identity`,
    /// newest first.
    ///
    /// Draining is atomic: concurrent drains never return the same entry.
    async fn drain_all(&self, identity: &str) -> Result<Vec<Notification>, BackendError>;
}

/// In-process pending queue.
#[derive(Debug)]
pub struct MemoryPendingQueue {
    queues: DashMap<Identity, VecDeque<Notification>>,
    retain: usize,
}

impl MemoryPendingQueue {
    /// Create a queue keeping [`DEFAULT_RETAIN`] entries per identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retain(DEFAULT_RETAIN)
    }

    /// Create a queue keeping up to `retain` entries per identity.
    #[must_use]
    pub fn with_retain(retain: usize) -> Self {
        Self {
            queues: DashMap::new(),
            retain: retain.max(1),
        }
    }

    /// Get the number of notifications queued for `identity`.
    #[must_use]
    pub fn pending(&self, identity: &str) -> usize {
        self.queues.get(identity).map(|q| q.len()).unwrap_or(0)
    }
}

impl Default for MemoryPendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PendingQueue for MemoryPendingQueue {
    async fn enqueue(&self, notification: Notification) -> Result<(), BackendError> {
        let recipient = notification.recipient.clone();
        let mut queue = self.queues.entry(recipient.clone()).or_default();

        queue.push_front(notification);
        if queue.len() > self.retain {
            queue.truncate(self.retain);
            debug!(identity = %recipient, retain = self.retain, "Pending queue full, evicted oldest");
        }

        Ok(())
    }

    async fn drain_all(&self, identity: &str) -> Result<Vec<Notification>, BackendError> {
        Ok(self
            .queues
            .remove(identity)
            .map(|(_, queue)| queue.into_iter().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(recipient: &str, title: &str) -> Notification {
        Notification::new(recipient, title, "body")
    }

    fn titles(notes: &[Notification]) -> Vec<&str> {
        notes.iter().map(|n| n.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_drain_returns_newest_first_once() {
        let queue = MemoryPendingQueue::new();
        queue.enqueue(note("alice", "first")).await.unwrap();
        queue.enqueue(note("alice", "second")).await.unwrap();
        queue.enqueue(note("bob", "other")).await.unwrap();

        let drained = queue.drain_all("alice").await.unwrap();
        assert_eq!(titles(&drained), vec!["second", "first"]);

        assert!(queue.drain_all("alice").await.unwrap().is_empty());
        assert_eq!(queue.pending("bob"), 1);
    }

    #[tokio::test]
    async fn test_retains_most_recent() {
        let queue = MemoryPendingQueue::with_retain(3);
        for i in 0..5 {
            queue.enqueue(note("alice", &format!("n{i}"))).await.unwrap();
        }

        assert_eq!(queue.pending("alice"), 3);
        let drained = queue.drain_all("alice").await.unwrap();
        assert_eq!(titles(&drained), vec!["n4", "n3", "n2"]);
    }

    #[tokio::test]
    async fn test_drain_unknown_identity() {
        let queue = MemoryPendingQueue::new();
        assert!(queue.drain_all("nobody").await.unwrap().is_empty());
    }
}
