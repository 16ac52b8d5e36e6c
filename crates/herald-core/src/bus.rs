//! Shared event bus.
//!
//! The bus moves opaque payloads between processes on named channels.
//! Encoding and dispatch live in [`crate::bridge`].

use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default per-channel buffer of the in-memory bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Stream of raw payloads received on one channel.
pub type BusStream = BoxStream<'static, Bytes>;

/// A publish/subscribe transport between processes.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload on a channel. No acknowledgment, no retry.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackendError>;

    /// Subscribe to a channel.
    ///
    /// The stream yields every payload published after the subscription and
    /// ends when the bus connection is lost. Callers resubscribe to recover;
    /// [`crate::EventBridge::subscribe`] does so until its task is aborted.
    async fn subscribe(&self, channel: &str) -> Result<BusStream, BackendError>;
}

/// In-process bus for single-node deployments and tests.
#[derive(Debug)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
}

impl MemoryBus {
    /// Create a bus with the default per-channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` payloads per channel.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Get the number of live subscribers on a channel.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackendError> {
        if let Some(tx) = self.channels.get(channel) {
            // No subscribers is not an error on a pub/sub bus.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusStream, BackendError> {
        let rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        debug!(channel = %channel, "Subscribed to in-memory bus channel");

        let channel = channel.to_string();
        let stream = stream::unfold(rx, move |mut rx| {
            let channel = channel.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => return Some((payload, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel, skipped, "Bus subscriber lagged, messages dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_bus_publish_subscribe() {
        let bus = MemoryBus::new();
        let mut s1 = bus.subscribe("chat").await.unwrap();
        let mut s2 = bus.subscribe("chat").await.unwrap();
        assert_eq!(bus.subscriber_count("chat"), 2);

        bus.publish("chat", Bytes::from_static(b"hello")).await.unwrap();

        assert_eq!(s1.next().await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(s2.next().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MemoryBus::new();
        assert!(bus.publish("nobody", Bytes::from_static(b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = MemoryBus::new();
        let mut chat = bus.subscribe("chat").await.unwrap();
        let _rooms = bus.subscribe("rooms").await.unwrap();

        bus.publish("rooms", Bytes::from_static(b"room")).await.unwrap();
        bus.publish("chat", Bytes::from_static(b"chat")).await.unwrap();

        assert_eq!(chat.next().await.unwrap(), Bytes::from_static(b"chat"));
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let bus = MemoryBus::with_capacity(2);
        let mut stream = bus.subscribe("chat").await.unwrap();

        for i in 0..5u8 {
            bus.publish("chat", Bytes::from(vec![i])).await.unwrap();
        }

        // The oldest payloads were overwritten; the newest still arrive.
        assert_eq!(stream.next().await.unwrap(), Bytes::from(vec![3u8]));
        assert_eq!(stream.next().await.unwrap(), Bytes::from(vec![4u8]));
    }
}
