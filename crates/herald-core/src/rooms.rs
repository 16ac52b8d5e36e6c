//! Room membership lookup.
//!
//! Membership is owned by the room service. The router only reads it, at
//! delivery time, to fan a room message out to members.

use crate::bridge::EventHandler;
use crate::error::BackendError;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use herald_protocol::{DomainEvent, Identity, RoomEventKind};
use std::collections::HashSet;
use tracing::{debug, trace};

/// Read access to the members of each room.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Get the current members of `room`. Unknown rooms have no members.
    async fn members(&self, room: &str) -> Result<HashSet<Identity>, BackendError>;
}

/// In-process room directory.
///
/// Kept current by subscribing it to the room-events channel, where the room
/// service announces joins, leaves and new rooms. This is a local mirror for
/// single-node deployments: it starts empty and only knows membership
/// announced after the subscription. Shared deployments read membership from
/// the room service's store on every event instead.
#[derive(Debug, Default)]
pub struct MemoryRoomDirectory {
    rooms: DashMap<String, DashSet<Identity>>,
}

impl MemoryRoomDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `identity` to `room`, creating the room if needed.
    pub fn join(&self, room: &str, identity: impl Into<Identity>) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(identity.into());
    }

    /// Remove `identity` from `room`.
    pub fn leave(&self, room: &str, identity: &str) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(identity);
        }
    }

    /// Get the number of known rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl RoomDirectory for MemoryRoomDirectory {
    async fn members(&self, room: &str) -> Result<HashSet<Identity>, BackendError> {
        Ok(self
            .rooms
            .get(room)
            .map(|members| members.iter().map(|m| m.key().clone()).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventHandler for MemoryRoomDirectory {
    async fn handle(&self, event: DomainEvent) -> Result<(), BackendError> {
        let DomainEvent::Room(room_event) = event else {
            trace!("Room directory ignoring non-room event");
            return Ok(());
        };

        match (room_event.kind, room_event.identity) {
            (RoomEventKind::Joined, Some(identity)) => {
                debug!(room = %room_event.room, identity = %identity, "Member joined");
                self.join(&room_event.room, identity);
            }
            (RoomEventKind::Left, Some(identity)) => {
                debug!(room = %room_event.room, identity = %identity, "Member left");
                self.leave(&room_event.room, &identity);
            }
            // The creator is a member of the new room.
            (RoomEventKind::Created, Some(creator)) => self.join(&room_event.room, creator),
            (RoomEventKind::Created, None) => {
                self.rooms.entry(room_event.room).or_default();
            }
            (kind, None) => {
                return Err(BackendError::InvalidData(format!(
                    "{} event without a username",
                    kind.as_str()
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_protocol::RoomEvent;

    fn room_event(kind: RoomEventKind, room: &str, identity: Option<&str>) -> DomainEvent {
        DomainEvent::Room(RoomEvent {
            kind,
            room: room.to_string(),
            identity: identity.map(str::to_string),
            timestamp: 1,
        })
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let rooms = MemoryRoomDirectory::new();
        rooms.join("general", "alice");
        rooms.join("general", "bob");
        rooms.leave("general", "alice");

        let members = rooms.members("general").await.unwrap();
        assert_eq!(members, HashSet::from(["bob".to_string()]));
        assert!(rooms.members("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mirrors_room_events() {
        let rooms = MemoryRoomDirectory::new();

        rooms
            .handle(room_event(RoomEventKind::Created, "dev", Some("carol")))
            .await
            .unwrap();
        rooms
            .handle(room_event(RoomEventKind::Joined, "dev", Some("dave")))
            .await
            .unwrap();
        rooms
            .handle(room_event(RoomEventKind::Left, "dev", Some("carol")))
            .await
            .unwrap();

        let members = rooms.members("dev").await.unwrap();
        assert_eq!(members, HashSet::from(["dave".to_string()]));
    }

    #[tokio::test]
    async fn test_join_without_username_is_rejected() {
        let rooms = MemoryRoomDirectory::new();
        let result = rooms
            .handle(room_event(RoomEventKind::Joined, "dev", None))
            .await;
        assert!(matches!(result, Err(BackendError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_ignores_other_events() {
        let rooms = MemoryRoomDirectory::new();
        rooms.handle(DomainEvent::presence("alice", true)).await.unwrap();
        assert_eq!(rooms.room_count(), 0);
    }

    #[tokio::test]
    async fn test_mirror_only_knows_announced_members() {
        let rooms = MemoryRoomDirectory::new();

        // erin joined "ops" before this directory was subscribed.
        rooms
            .handle(room_event(RoomEventKind::Left, "ops", Some("erin")))
            .await
            .unwrap();
        assert!(rooms.members("ops").await.unwrap().is_empty());

        rooms
            .handle(room_event(RoomEventKind::Joined, "ops", Some("frank")))
            .await
            .unwrap();
        assert_eq!(
            rooms.members("ops").await.unwrap(),
            HashSet::from(["frank".to_string()])
        );
    }
}
