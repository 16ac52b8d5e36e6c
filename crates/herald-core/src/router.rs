//! Fan-out router.
//!
//! Turns a domain event into writes on this process's live connections:
//!
//! | Event              | Recipients                      | Undelivered |
//! |--------------------|---------------------------------|-------------|
//! | `NewMessage`       | room members, looked up per event | dropped   |
//! | `NewDirectMessage` | the recipient                   | dropped     |
//! | `PresenceChanged`  | every connection                | dropped     |
//! | `Room`             | every connection                | dropped     |
//! | `Notification`     | the recipient                   | queued      |
//!
//! Each process only reaches its own connections. An identity connected
//! elsewhere is served by that process's router, fed from the same bus.

use crate::bridge::EventHandler;
use crate::error::BackendError;
use crate::queue::PendingQueue;
use crate::registry::ConnectionRegistry;
use crate::rooms::RoomDirectory;
use async_trait::async_trait;
use herald_protocol::{DomainEvent, Notification, ServerFrame};
use std::sync::Arc;
use tracing::{debug, trace};

/// Outcome of routing one event on this process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the frame was written to.
    pub delivered: usize,
    /// Whether the event was put on the pending queue instead.
    pub queued: bool,
}

impl Delivery {
    fn sent(delivered: usize) -> Self {
        Self {
            delivered,
            queued: false,
        }
    }
}

/// Routes domain events to local connections.
pub struct FanoutRouter {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<dyn RoomDirectory>,
    pending: Arc<dyn PendingQueue>,
}

impl FanoutRouter {
    /// Create a router over a registry and its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<dyn RoomDirectory>,
        pending: Arc<dyn PendingQueue>,
    ) -> Self {
        Self {
            registry,
            rooms,
            pending,
        }
    }

    /// Deliver an event to the connections it targets.
    ///
    /// # Errors
    ///
    /// Returns an error if room membership or the pending queue is
    /// unavailable. Unreachable recipients are not errors.
    pub async fn route(&self, event: &DomainEvent) -> Result<Delivery, BackendError> {
        let delivery = match event {
            DomainEvent::NewMessage(message) => {
                let members = self.rooms.members(&message.room).await?;
                let frame = Arc::new(ServerFrame::from(event));

                let delivered = members
                    .iter()
                    .filter(|member| self.registry.send(member, Arc::clone(&frame)))
                    .count();

                debug!(
                    room = %message.room,
                    members = members.len(),
                    delivered,
                    "Routed room message"
                );
                Delivery::sent(delivered)
            }
            DomainEvent::NewDirectMessage(message) => {
                let sent = self
                    .registry
                    .send(&message.recipient, Arc::new(ServerFrame::from(event)));
                if !sent {
                    trace!(recipient = %message.recipient, "Direct message recipient not connected here");
                }
                Delivery::sent(usize::from(sent))
            }
            DomainEvent::PresenceChanged(_) | DomainEvent::Room(_) => {
                let delivered = self.registry.broadcast_all(Arc::new(ServerFrame::from(event)));
                trace!(event = event.name(), delivered, "Broadcast event");
                Delivery::sent(delivered)
            }
            DomainEvent::Notification(notification) => {
                return self.notify(notification.clone()).await;
            }
        };

        Ok(delivery)
    }

    /// Deliver a notification now, or queue it for its recipient.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification could not be queued.
    pub async fn notify(&self, notification: Notification) -> Result<Delivery, BackendError> {
        let frame = Arc::new(ServerFrame::Notification {
            data: notification.payload(),
        });

        if self.registry.send(&notification.recipient, frame) {
            debug!(recipient = %notification.recipient, "Delivered notification");
            return Ok(Delivery::sent(1));
        }

        debug!(recipient = %notification.recipient, "Recipient offline, queueing notification");
        self.pending.enqueue(notification).await?;
        Ok(Delivery {
            delivered: 0,
            queued: true,
        })
    }

    /// Remove and return every pending notification for `identity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending queue is unavailable.
    pub async fn drain_pending(&self, identity: &str) -> Result<Vec<Notification>, BackendError> {
        self.pending.drain_all(identity).await
    }
}

#[async_trait]
impl EventHandler for FanoutRouter {
    async fn handle(&self, event: DomainEvent) -> Result<(), BackendError> {
        self.route(&event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::queue::MemoryPendingQueue;
    use crate::rooms::MemoryRoomDirectory;
    use herald_protocol::{now_millis, DirectMessage, RoomEvent, RoomEventKind, RoomMessage};
    use tokio::sync::mpsc;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        rooms: Arc<MemoryRoomDirectory>,
        router: FanoutRouter,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(MemoryRoomDirectory::new());
        let pending = Arc::new(MemoryPendingQueue::new());
        let router = FanoutRouter::new(registry.clone(), rooms.clone(), pending);
        Fixture {
            registry,
            rooms,
            router,
        }
    }

    fn connect(registry: &ConnectionRegistry, identity: &str) -> mpsc::Receiver<Arc<ServerFrame>> {
        let (conn, rx) = Connection::channel(16);
        registry.register(identity, conn);
        rx
    }

    #[tokio::test]
    async fn test_room_message_reaches_connected_members_only() {
        let f = fixture();
        for member in ["a", "b", "c"] {
            f.rooms.join("general", member);
        }
        let mut rx_b = connect(&f.registry, "b");
        let mut rx_outsider = connect(&f.registry, "z");

        let event = DomainEvent::NewMessage(RoomMessage {
            id: None,
            room: "general".to_string(),
            sender: "a".to_string(),
            content: "hi".to_string(),
            timestamp: now_millis(),
        });

        let delivery = f.router.route(&event).await.unwrap();
        assert_eq!(delivery, Delivery::sent(1));

        match &*rx_b.try_recv().unwrap() {
            ServerFrame::Message { data } => {
                assert_eq!(data.content, "hi");
                assert_eq!(data.sender, "a");
            }
            other => panic!("Expected message frame, got {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
        assert!(rx_outsider.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_message() {
        let f = fixture();
        let mut rx_alice = connect(&f.registry, "alice");
        let mut rx_bob = connect(&f.registry, "bob");

        let event = DomainEvent::NewDirectMessage(DirectMessage {
            id: None,
            sender: "bob".to_string(),
            recipient: "alice".to_string(),
            content: "hey".to_string(),
            timestamp: 7,
        });

        assert_eq!(f.router.route(&event).await.unwrap().delivered, 1);
        assert!(matches!(
            &*rx_alice.try_recv().unwrap(),
            ServerFrame::DirectMessage { data } if data.content == "hey"
        ));
        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_direct_message_to_offline_is_dropped() {
        let f = fixture();
        let event = DomainEvent::NewDirectMessage(DirectMessage {
            id: None,
            sender: "bob".to_string(),
            recipient: "alice".to_string(),
            content: "hey".to_string(),
            timestamp: 7,
        });

        let delivery = f.router.route(&event).await.unwrap();
        assert_eq!(delivery, Delivery::default());
        assert!(f.router.drain_pending("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presence_and_room_events_broadcast() {
        let f = fixture();
        let mut rx_a = connect(&f.registry, "a");
        let mut rx_b = connect(&f.registry, "b");

        let presence = DomainEvent::presence("c", true);
        assert_eq!(f.router.route(&presence).await.unwrap().delivered, 2);

        let room = DomainEvent::Room(RoomEvent {
            kind: RoomEventKind::Created,
            room: "dev".to_string(),
            identity: Some("c".to_string()),
            timestamp: 1,
        });
        assert_eq!(f.router.route(&room).await.unwrap().delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.try_recv().unwrap().frame_type(), "presence");
            assert_eq!(rx.try_recv().unwrap().frame_type(), "room");
        }
    }

    #[tokio::test]
    async fn test_broadcast_with_no_connections() {
        let f = fixture();
        let delivery = f.router.route(&DomainEvent::presence("a", false)).await.unwrap();
        assert_eq!(delivery, Delivery::default());
    }

    #[tokio::test]
    async fn test_notification_queued_and_drained_once() {
        let f = fixture();

        let delivery = f
            .router
            .notify(Notification::new("alice", "Build", "passed"))
            .await
            .unwrap();
        assert!(delivery.queued);
        assert_eq!(delivery.delivered, 0);

        let drained = f.router.drain_pending("alice").await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].title, "Build");
        assert!(f.router.drain_pending("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notification_to_connected_identity() {
        let f = fixture();
        let mut rx = connect(&f.registry, "alice");

        let event = DomainEvent::Notification(Notification::new("alice", "Build", "passed"));
        let delivery = f.router.route(&event).await.unwrap();
        assert_eq!(delivery, Delivery::sent(1));

        assert!(matches!(
            &*rx.try_recv().unwrap(),
            ServerFrame::Notification { data } if data.message == "passed"
        ));
        assert!(f.router.drain_pending("alice").await.unwrap().is_empty());
    }
}
