//! # herald-core
//!
//! Connection registry, presence tracking and event fan-out for Herald.
//!
//! - **Registry** - at most one live connection per identity, per process
//! - **Presence** - global online set with heartbeat TTL and a sweeper
//! - **Bus / Bridge** - cross-process pub/sub and per-channel dispatch
//! - **Router** - delivers domain events to local connections
//! - **Queue** - pending notifications for offline identities
//!
//! ## Architecture
//!
//! ```text
//!  producers ──publish──▶ ┌───────────┐ ──subscribe──▶ ┌──────────────┐
//!                         │ EventBus  │                │ EventBridge  │
//!                         └───────────┘                └──────┬───────┘
//!                                                             ▼
//!  ┌──────────────┐   members   ┌──────────────┐   send  ┌──────────────┐
//!  │ RoomDirectory│◀────────────│ FanoutRouter │────────▶│  Registry    │
//!  └──────────────┘             └──────┬───────┘         └──────────────┘
//!                                      │ offline
//!                                      ▼
//!                               ┌──────────────┐
//!                               │ PendingQueue │
//!                               └──────────────┘
//! ```
//!
//! The in-memory backends serve a single node. With the `redis` feature,
//! [`RedisBackend`] implements every store and the bus over one server.

pub mod bridge;
pub mod bus;
pub mod connection;
pub mod error;
pub mod presence;
pub mod queue;
#[cfg(feature = "redis")]
pub mod redis_backend;
pub mod registry;
pub mod rooms;
pub mod router;
pub mod sweeper;

pub use bridge::{EventBridge, EventHandler};
pub use bus::{BusStream, EventBus, MemoryBus, DEFAULT_BUS_CAPACITY};
pub use connection::{Connection, ConnectionId, SendError};
pub use error::BackendError;
pub use presence::{
    MemoryPresenceStore, PresenceRecord, PresenceStore, PresenceTracker, DEFAULT_PRESENCE_TTL,
};
pub use queue::{MemoryPendingQueue, PendingQueue, DEFAULT_RETAIN};
#[cfg(feature = "redis")]
pub use redis_backend::RedisBackend;
pub use registry::ConnectionRegistry;
pub use rooms::{MemoryRoomDirectory, RoomDirectory};
pub use router::{Delivery, FanoutRouter};
pub use sweeper::{Sweeper, SweeperHandle};
