//! Event bus bridge.
//!
//! Encodes domain events for publishing and runs one dispatch task per
//! subscribed channel. Each received payload is decoded and handed to the
//! channel's handler in isolation: a malformed payload, a handler error or a
//! handler panic is logged and the loop moves on to the next message.
//!
//! A subscription that ends or cannot be re-established is retried with a
//! capped exponential backoff until the dispatch task is aborted.

use crate::bus::EventBus;
use crate::error::BackendError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{FutureExt, StreamExt};
use herald_protocol::{channels, BusCodec, DomainEvent};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Delay before the first resubscribe attempt.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(100);

/// Upper bound on the resubscribe backoff.
const MAX_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Receives decoded events from a bus subscription.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event.
    async fn handle(&self, event: DomainEvent) -> Result<(), BackendError>;
}

/// Publishes domain events to the bus and dispatches subscribed channels.
pub struct EventBridge {
    bus: Arc<dyn EventBus>,
    codec: BusCodec,
}

impl EventBridge {
    /// Create a bridge over `bus` using `codec` for payloads.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, codec: BusCodec) -> Self {
        Self { bus, codec }
    }

    /// Publish an event on a channel.
    ///
    /// Best effort: encoding or bus failures are logged and the event is
    /// dropped. Returns `true` if the bus accepted the payload.
    pub async fn publish(&self, channel: &str, event: &DomainEvent) -> bool {
        let payload = match self.codec.encode(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(channel = %channel, event = event.name(), error = %e, "Failed to encode event");
                return false;
            }
        };

        match self.bus.publish(channel, payload).await {
            Ok(()) => {
                trace!(channel = %channel, event = event.name(), "Published event");
                true
            }
            Err(e) => {
                warn!(channel = %channel, event = event.name(), error = %e, "Bus publish failed, event dropped");
                false
            }
        }
    }

    /// Publish an event on the channel for its kind.
    ///
    /// Events without a bus channel (targeted notifications) are not
    /// published and return `false`.
    pub async fn publish_event(&self, event: &DomainEvent) -> bool {
        match channels::for_event(event) {
            Some(channel) => self.publish(channel, event).await,
            None => {
                warn!(event = event.name(), "Event kind is not carried by the bus");
                false
            }
        }
    }

    /// Subscribe `handler` to `channel` for the lifetime of the process.
    ///
    /// Spawns the channel's dispatch task and returns its handle. When the
    /// bus stream ends the task resubscribes, backing off between failed
    /// attempts, and only stops when aborted.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus refuses the initial subscription.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<JoinHandle<()>, BackendError> {
        let stream = self.bus.subscribe(channel).await?;
        let bus = Arc::clone(&self.bus);
        let codec = self.codec;
        let channel = channel.to_string();

        info!(channel = %channel, codec = codec.name(), "Subscribed to bus channel");

        Ok(tokio::spawn(async move {
            let mut stream = Some(stream);
            let mut delay = RESUBSCRIBE_DELAY;

            loop {
                if let Some(mut active) = stream.take() {
                    while let Some(payload) = active.next().await {
                        dispatch(&channel, codec, handler.as_ref(), payload).await;
                    }
                    warn!(channel = %channel, "Bus subscription ended, resubscribing");
                }

                tokio::time::sleep(delay).await;

                match bus.subscribe(&channel).await {
                    Ok(next) => {
                        info!(channel = %channel, "Resubscribed to bus channel");
                        stream = Some(next);
                        delay = RESUBSCRIBE_DELAY;
                    }
                    Err(e) => {
                        delay = (delay * 2).min(MAX_RESUBSCRIBE_DELAY);
                        warn!(
                            channel = %channel,
                            error = %e,
                            retry_ms = delay.as_millis() as u64,
                            "Bus resubscribe failed"
                        );
                    }
                }
            }
        }))
    }
}

/// Decode and handle one payload, containing every failure.
async fn dispatch(channel: &str, codec: BusCodec, handler: &dyn EventHandler, payload: Bytes) {
    let event = match codec.decode(&payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(channel = %channel, bytes = payload.len(), error = %e, "Discarding malformed bus message");
            return;
        }
    };

    let name = event.name();
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => debug!(channel = %channel, event = name, "Dispatched event"),
        Ok(Err(e)) => error!(channel = %channel, event = name, error = %e, "Event handler failed"),
        Err(_) => error!(channel = %channel, event = name, "Event handler panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusStream, MemoryBus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Forwards events to a channel; fails or panics on magic senders.
    struct Probe {
        tx: mpsc::UnboundedSender<DomainEvent>,
    }

    #[async_trait]
    impl EventHandler for Probe {
        async fn handle(&self, event: DomainEvent) -> Result<(), BackendError> {
            if let DomainEvent::PresenceChanged(p) = &event {
                if p.identity == "fail" {
                    return Err(BackendError::Unavailable("store down".to_string()));
                }
                if p.identity == "panic" {
                    panic!("handler bug");
                }
            }
            let _ = self.tx.send(event);
            Ok(())
        }
    }

    async fn setup(codec: BusCodec) -> (Arc<MemoryBus>, EventBridge, mpsc::UnboundedReceiver<DomainEvent>) {
        let bus = Arc::new(MemoryBus::new());
        let bridge = EventBridge::new(bus.clone(), codec);
        let (tx, rx) = mpsc::unbounded_channel();
        bridge
            .subscribe(channels::PRESENCE, Arc::new(Probe { tx }))
            .await
            .unwrap();
        (bus, bridge, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<DomainEvent>) -> DomainEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("handler dropped")
    }

    #[tokio::test]
    async fn test_publish_reaches_handler() {
        for codec in [BusCodec::Json, BusCodec::Msgpack] {
            let (_bus, bridge, mut rx) = setup(codec).await;
            let event = DomainEvent::presence("alice", true);

            assert!(bridge.publish_event(&event).await);
            assert_eq!(next(&mut rx).await, event);
        }
    }

    #[tokio::test]
    async fn test_bad_messages_do_not_stop_subscription() {
        let (bus, bridge, mut rx) = setup(BusCodec::Json).await;

        bus.publish(channels::PRESENCE, Bytes::from_static(b"{garbage"))
            .await
            .unwrap();
        bridge
            .publish_event(&DomainEvent::presence("fail", true))
            .await;
        bridge
            .publish_event(&DomainEvent::presence("panic", true))
            .await;

        let event = DomainEvent::presence("bob", false);
        bridge.publish_event(&event).await;
        assert_eq!(next(&mut rx).await, event);
    }

    #[tokio::test]
    async fn test_notification_not_published() {
        let (_bus, bridge, _rx) = setup(BusCodec::Json).await;
        let event = DomainEvent::Notification(herald_protocol::Notification::new("a", "t", "b"));
        assert!(!bridge.publish_event(&event).await);
    }

    #[tokio::test]
    async fn test_accepts_external_producer_payload() {
        let (bus, _bridge, mut rx) = setup(BusCodec::Json).await;

        bus.publish(
            channels::PRESENCE,
            Bytes::from_static(br#"{"event":"user-online","data":{"username":"dave","timestamp":12}}"#),
        )
        .await
        .unwrap();

        match next(&mut rx).await {
            DomainEvent::PresenceChanged(p) => {
                assert_eq!(p.identity, "dave");
                assert!(p.online);
                assert_eq!(p.timestamp, 12);
            }
            other => panic!("Expected presence event, got {:?}", other),
        }
    }

    /// A bus that is down for every operation.
    struct DownBus;

    #[async_trait]
    impl EventBus for DownBus {
        async fn publish(&self, _channel: &str, _payload: Bytes) -> Result<(), BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }

        async fn subscribe(&self, _channel: &str) -> Result<BusStream, BackendError> {
            Err(BackendError::Unavailable("connection refused".to_string()))
        }
    }

    /// Memory bus whose first stream ends after one payload and whose second
    /// subscribe attempt is refused.
    #[derive(Default)]
    struct FlakyBus {
        inner: MemoryBus,
        subscribes: AtomicUsize,
    }

    #[async_trait]
    impl EventBus for FlakyBus {
        async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackendError> {
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, channel: &str) -> Result<BusStream, BackendError> {
            match self.subscribes.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(self.inner.subscribe(channel).await?.take(1).boxed()),
                1 => Err(BackendError::Unavailable("connection reset".to_string())),
                _ => self.inner.subscribe(channel).await,
            }
        }
    }

    #[tokio::test]
    async fn test_publish_on_unavailable_bus_drops_event() {
        let bridge = EventBridge::new(Arc::new(DownBus), BusCodec::Json);

        assert!(!bridge.publish_event(&DomainEvent::presence("alice", true)).await);
        assert!(!bridge.publish(channels::CHAT, &DomainEvent::presence("bob", false)).await);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(bridge
            .subscribe(channels::PRESENCE, Arc::new(Probe { tx }))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_resubscribes_after_stream_ends() {
        let bus = Arc::new(FlakyBus::default());
        let bridge = EventBridge::new(bus.clone(), BusCodec::Json);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = bridge
            .subscribe(channels::PRESENCE, Arc::new(Probe { tx }))
            .await
            .unwrap();

        let first = DomainEvent::presence("alice", true);
        assert!(bridge.publish_event(&first).await);
        assert_eq!(next(&mut rx).await, first);

        // Past the refused attempt and onto a live subscription again.
        tokio::time::timeout(Duration::from_secs(5), async {
            while bus.subscribes.load(Ordering::SeqCst) < 3
                || bus.inner.subscriber_count(channels::PRESENCE) == 0
            {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("never resubscribed");

        let second = DomainEvent::presence("bob", true);
        assert!(bridge.publish_event(&second).await);
        assert_eq!(next(&mut rx).await, second);
        assert!(!task.is_finished());

        task.abort();
    }
}
