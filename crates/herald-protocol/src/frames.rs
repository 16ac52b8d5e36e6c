//! Domain events and socket frames.
//!
//! `DomainEvent` is what producers publish on the bus. On the wire it is the
//! `{"event": "...", "data": {...}}` envelope used by the chat services, so
//! payloads published by the room and message services decode unchanged.
//!
//! `ServerFrame` and `ClientFrame` are the JSON text frames exchanged with
//! WebSocket clients. Every server frame carries a `type` discriminator;
//! presence and room frames also carry an `event` sub-tag.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// An opaque user identity (the `username` on the wire).
pub type Identity = String;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A chat message posted to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// Message id assigned by the message service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Target room.
    pub room: String,
    /// Sender identity.
    pub sender: Identity,
    /// Message body.
    pub content: String,
    /// Creation time in milliseconds.
    pub timestamp: u64,
}

/// A direct message between two identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    /// Message id assigned by the message service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Sender identity.
    pub sender: Identity,
    /// Recipient identity.
    pub recipient: Identity,
    /// Message body.
    pub content: String,
    /// Creation time in milliseconds.
    pub timestamp: u64,
}

/// An identity went online or offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub identity: Identity,
    pub online: bool,
    pub timestamp: u64,
}

/// Kind of room membership or lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomEventKind {
    #[serde(rename = "user-joined")]
    Joined,
    #[serde(rename = "user-left")]
    Left,
    #[serde(rename = "room-created")]
    Created,
}

impl RoomEventKind {
    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomEventKind::Joined => "user-joined",
            RoomEventKind::Left => "user-left",
            RoomEventKind::Created => "room-created",
        }
    }
}

/// A room membership or lifecycle change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub kind: RoomEventKind,
    pub room: String,
    /// The member who joined or left, or the creator of a new room.
    pub identity: Option<Identity>,
    pub timestamp: u64,
}

/// A targeted, out-of-band notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: Identity,
    pub title: String,
    pub body: String,
    pub timestamp: u64,
}

impl Notification {
    /// Create a notification stamped with the current time.
    #[must_use]
    pub fn new(
        recipient: impl Into<Identity>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            title: title.into(),
            body: body.into(),
            timestamp: now_millis(),
        }
    }

    /// The client-facing payload of this notification.
    #[must_use]
    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            recipient: None,
            title: self.title.clone(),
            message: self.body.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Presence payload: `{"username", "timestamp"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub username: Identity,
    pub timestamp: u64,
}

/// Room payload.
///
/// `room-created` events carry the stored room record, so `name`, `creator`
/// and `created` are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPayload {
    #[serde(alias = "name")]
    pub room: String,
    #[serde(default, alias = "creator", skip_serializing_if = "Option::is_none")]
    pub username: Option<Identity>,
    #[serde(alias = "created")]
    pub timestamp: u64,
}

/// Notification payload: `{"title", "message", "timestamp"}`.
///
/// The recipient is only present when the notification travels on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Identity>,
    pub title: String,
    pub message: String,
    pub timestamp: u64,
}

impl NotificationPayload {
    /// Attach a recipient, producing a domain notification.
    #[must_use]
    pub fn into_notification(self, recipient: impl Into<Identity>) -> Notification {
        Notification {
            recipient: recipient.into(),
            title: self.title,
            body: self.message,
            timestamp: self.timestamp,
        }
    }
}

/// An immutable event published by a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireEvent", try_from = "WireEvent")]
pub enum DomainEvent {
    NewMessage(RoomMessage),
    NewDirectMessage(DirectMessage),
    PresenceChanged(PresenceChange),
    Room(RoomEvent),
    Notification(Notification),
}

impl DomainEvent {
    /// A presence change for `identity`, stamped now.
    #[must_use]
    pub fn presence(identity: impl Into<Identity>, online: bool) -> Self {
        DomainEvent::PresenceChanged(PresenceChange {
            identity: identity.into(),
            online,
            timestamp: now_millis(),
        })
    }

    /// The wire event name (`new-message`, `user-online`, ...).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::NewMessage(_) => "new-message",
            DomainEvent::NewDirectMessage(_) => "new-direct-message",
            DomainEvent::PresenceChanged(p) if p.online => "user-online",
            DomainEvent::PresenceChanged(_) => "user-offline",
            DomainEvent::Room(r) => r.kind.as_str(),
            DomainEvent::Notification(_) => "notification",
        }
    }
}

/// Bus envelope. Kept private; `DomainEvent` converts through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
enum WireEvent {
    #[serde(rename = "new-message")]
    NewMessage(RoomMessage),
    #[serde(rename = "new-direct-message")]
    NewDirectMessage(DirectMessage),
    #[serde(rename = "user-online")]
    UserOnline(PresencePayload),
    #[serde(rename = "user-offline")]
    UserOffline(PresencePayload),
    #[serde(rename = "user-joined")]
    UserJoined(RoomPayload),
    #[serde(rename = "user-left")]
    UserLeft(RoomPayload),
    #[serde(rename = "room-created")]
    RoomCreated(RoomPayload),
    #[serde(rename = "notification")]
    Notification(NotificationPayload),
}

fn presence_payload(p: &PresenceChange) -> PresencePayload {
    PresencePayload {
        username: p.identity.clone(),
        timestamp: p.timestamp,
    }
}

fn room_payload(r: &RoomEvent) -> RoomPayload {
    RoomPayload {
        room: r.room.clone(),
        username: r.identity.clone(),
        timestamp: r.timestamp,
    }
}

fn room_event(kind: RoomEventKind, payload: RoomPayload) -> RoomEvent {
    RoomEvent {
        kind,
        room: payload.room,
        identity: payload.username,
        timestamp: payload.timestamp,
    }
}

impl From<DomainEvent> for WireEvent {
    fn from(event: DomainEvent) -> Self {
        match event {
            DomainEvent::NewMessage(m) => WireEvent::NewMessage(m),
            DomainEvent::NewDirectMessage(m) => WireEvent::NewDirectMessage(m),
            DomainEvent::PresenceChanged(p) if p.online => {
                WireEvent::UserOnline(presence_payload(&p))
            }
            DomainEvent::PresenceChanged(p) => WireEvent::UserOffline(presence_payload(&p)),
            DomainEvent::Room(r) => match r.kind {
                RoomEventKind::Joined => WireEvent::UserJoined(room_payload(&r)),
                RoomEventKind::Left => WireEvent::UserLeft(room_payload(&r)),
                RoomEventKind::Created => WireEvent::RoomCreated(room_payload(&r)),
            },
            DomainEvent::Notification(n) => WireEvent::Notification(NotificationPayload {
                recipient: Some(n.recipient),
                title: n.title,
                message: n.body,
                timestamp: n.timestamp,
            }),
        }
    }
}

impl TryFrom<WireEvent> for DomainEvent {
    type Error = &'static str;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let event = match wire {
            WireEvent::NewMessage(m) => DomainEvent::NewMessage(m),
            WireEvent::NewDirectMessage(m) => DomainEvent::NewDirectMessage(m),
            WireEvent::UserOnline(p) => DomainEvent::PresenceChanged(PresenceChange {
                identity: p.username,
                online: true,
                timestamp: p.timestamp,
            }),
            WireEvent::UserOffline(p) => DomainEvent::PresenceChanged(PresenceChange {
                identity: p.username,
                online: false,
                timestamp: p.timestamp,
            }),
            WireEvent::UserJoined(r) => DomainEvent::Room(room_event(RoomEventKind::Joined, r)),
            WireEvent::UserLeft(r) => DomainEvent::Room(room_event(RoomEventKind::Left, r)),
            WireEvent::RoomCreated(r) => DomainEvent::Room(room_event(RoomEventKind::Created, r)),
            WireEvent::Notification(mut n) => match n.recipient.take() {
                Some(recipient) => DomainEvent::Notification(n.into_notification(recipient)),
                None => return Err("notification event without recipient"),
            },
        };
        Ok(event)
    }
}

/// Sub-tag of `presence` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresenceEventKind {
    #[serde(rename = "user-online")]
    Online,
    #[serde(rename = "user-offline")]
    Offline,
}

/// A frame sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Registration acknowledgment.
    #[serde(rename = "register")]
    Register { status: String },

    /// A room chat message.
    #[serde(rename = "message")]
    Message { data: RoomMessage },

    /// A direct message.
    #[serde(rename = "direct-message")]
    DirectMessage { data: DirectMessage },

    /// Someone went online or offline.
    #[serde(rename = "presence")]
    Presence {
        event: PresenceEventKind,
        data: PresencePayload,
    },

    /// Room membership or lifecycle change.
    #[serde(rename = "room")]
    Room {
        event: RoomEventKind,
        data: RoomPayload,
    },

    /// A targeted notification.
    #[serde(rename = "notification")]
    Notification { data: NotificationPayload },

    /// Reply to a client ping.
    #[serde(rename = "pong")]
    Pong { timestamp: u64 },

    /// The client sent something the server could not process.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerFrame {
    /// Successful registration acknowledgment.
    #[must_use]
    pub fn registered() -> Self {
        ServerFrame::Register {
            status: "success".to_string(),
        }
    }

    /// Create a pong frame echoing the client's timestamp.
    #[must_use]
    pub fn pong(timestamp: u64) -> Self {
        ServerFrame::Pong { timestamp }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    /// The `type` discriminator of this frame.
    #[must_use]
    pub fn frame_type(&self) -> &'static str {
        match self {
            ServerFrame::Register { .. } => "register",
            ServerFrame::Message { .. } => "message",
            ServerFrame::DirectMessage { .. } => "direct-message",
            ServerFrame::Presence { .. } => "presence",
            ServerFrame::Room { .. } => "room",
            ServerFrame::Notification { .. } => "notification",
            ServerFrame::Pong { .. } => "pong",
            ServerFrame::Error { .. } => "error",
        }
    }
}

impl From<&DomainEvent> for ServerFrame {
    fn from(event: &DomainEvent) -> Self {
        match event {
            DomainEvent::NewMessage(m) => ServerFrame::Message { data: m.clone() },
            DomainEvent::NewDirectMessage(m) => ServerFrame::DirectMessage { data: m.clone() },
            DomainEvent::PresenceChanged(p) => ServerFrame::Presence {
                event: if p.online {
                    PresenceEventKind::Online
                } else {
                    PresenceEventKind::Offline
                },
                data: presence_payload(p),
            },
            DomainEvent::Room(r) => ServerFrame::Room {
                event: r.kind,
                data: room_payload(r),
            },
            DomainEvent::Notification(n) => ServerFrame::Notification { data: n.payload() },
        }
    }
}

/// A frame sent from a client to the server.
///
/// Anything other than `register` and `ping` belongs to the chat services and
/// decodes as [`ClientFrame::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Bind this socket to an identity.
    #[serde(rename = "register")]
    Register { username: Identity },

    /// Application-level liveness probe.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: u64,
    },

    #[serde(other)]
    Other,
}
