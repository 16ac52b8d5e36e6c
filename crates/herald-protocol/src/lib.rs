//! # herald-protocol
//!
//! Wire definitions for the Herald fan-out service.
//!
//! - **Domain events** - what producers publish on the shared bus
//! - **Server / client frames** - JSON text frames on the WebSocket
//! - **Channels** - bus channel names and event-to-channel mapping
//! - **Codec** - JSON frames, JSON or MessagePack bus payloads
//!
//! ## Example
//!
//! ```rust
//! use herald_protocol::{BusCodec, DomainEvent, ServerFrame, codec};
//!
//! let event = DomainEvent::presence("alice", true);
//!
//! // What goes on the bus
//! let payload = BusCodec::Json.encode(&event).unwrap();
//! assert_eq!(BusCodec::Json.decode(&payload).unwrap(), event);
//!
//! // What a connected client receives
//! let text = codec::encode_frame(&ServerFrame::from(&event)).unwrap();
//! assert!(text.contains("\"type\":\"presence\""));
//! ```

pub mod channels;
pub mod codec;
pub mod frames;

pub use codec::{BusCodec, ProtocolError};
pub use frames::{
    now_millis, ClientFrame, DirectMessage, DomainEvent, Identity, Notification,
    NotificationPayload, PresenceChange, PresenceEventKind, PresencePayload, RoomEvent,
    RoomEventKind, RoomMessage, RoomPayload, ServerFrame,
};
