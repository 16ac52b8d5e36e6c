//! Process-local registry of live connections.
//!
//! The registry holds at most one connection per identity. Shard locks are
//! held only while the map is read or updated; writes to a connection happen
//! after the guard is released.

use crate::connection::{Connection, SendError};
use dashmap::DashMap;
use herald_protocol::{Identity, ServerFrame};
use std::sync::Arc;
use tracing::{debug, trace};

/// Maps identities to their live connection on this process.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<Identity, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `connection` to `identity`, replacing any previous connection.
    ///
    /// The replaced connection is returned but not closed; closing it is the
    /// transport's job. Its later unregister is a no-op.
    pub fn register(
        &self,
        identity: impl Into<Identity>,
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        let identity = identity.into();
        let connection_id = connection.id();
        let previous = self.connections.insert(identity.clone(), connection);

        match &previous {
            Some(old) if old.id() != connection_id => debug!(
                identity = %identity,
                connection = connection_id,
                replaced = old.id(),
                "Registered connection, replacing previous"
            ),
            _ => debug!(identity = %identity, connection = connection_id, "Registered connection"),
        }

        previous.filter(|old| old.id() != connection_id)
    }

    /// Get the open connection for `identity`.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<Arc<Connection>> {
        self.connections
            .get(identity)
            .filter(|entry| entry.is_open())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `identity`'s mapping if it still points at `connection`.
    ///
    /// Returns `true` if the mapping was removed. A disconnect arriving after
    /// a newer registration for the same identity leaves the newer one alone.
    pub fn unregister(&self, identity: &str, connection: &Connection) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, current| current.id() == connection.id())
            .is_some();

        if removed {
            debug!(identity = %identity, connection = connection.id(), "Unregistered connection");
        } else {
            trace!(
                identity = %identity,
                connection = connection.id(),
                "Ignoring unregister for superseded connection"
            );
        }

        removed
    }

    /// Write a frame to `identity`'s connection.
    ///
    /// Returns `false` when there is no open connection or its buffer is full.
    pub fn send(&self, identity: &str, frame: Arc<ServerFrame>) -> bool {
        let Some(connection) = self.lookup(identity) else {
            trace!(identity = %identity, "No live connection");
            return false;
        };

        match connection.try_send(frame) {
            Ok(()) => true,
            Err(SendError::Full) => {
                debug!(identity = %identity, connection = connection.id(), "Outbound buffer full, dropping frame");
                false
            }
            Err(SendError::Closed) => {
                trace!(identity = %identity, connection = connection.id(), "Connection closed before write");
                false
            }
        }
    }

    /// Write a frame to every open connection.
    ///
    /// Returns the number of connections the frame was queued on.
    pub fn broadcast_all(&self, frame: Arc<ServerFrame>) -> usize {
        let targets: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let delivered = targets
            .iter()
            .filter(|connection| connection.try_send(Arc::clone(&frame)).is_ok())
            .count();

        trace!(targets = targets.len(), delivered, "Broadcast frame");
        delivered
    }

    /// Get the number of registered identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no identity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
