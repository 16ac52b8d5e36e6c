//! Live client connections.
//!
//! A [`Connection`] is the registry's handle on one client socket. Writes go
//! into a bounded queue drained by the socket task, so a writer never waits
//! on the network.

use herald_protocol::ServerFrame;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Process-unique connection identifier.
pub type ConnectionId = u64;

/// Monotonic counter for connection ids.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why a write to a connection did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is closed or its socket task has gone away.
    #[error("Connection closed")]
    Closed,

    /// The outbound queue is full.
    #[error("Outbound buffer full")]
    Full,
}

/// A live connection to one client.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Arc<ServerFrame>>,
    open: AtomicBool,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` frames.
    ///
    /// Returns the shared handle and the receiver the socket task drains.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn channel(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<ServerFrame>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let connection = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            sender,
            open: AtomicBool::new(true),
        };
        (Arc::new(connection), receiver)
    }

    /// Get the connection id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Check if the connection can still be written to.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    /// Mark the connection closed. Later writes fail with [`SendError::Closed`].
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Closed`] if the connection is closed and
    /// [`SendError::Full`] if the outbound queue is full.
    pub fn try_send(&self, frame: Arc<ServerFrame>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => {
                self.close();
                SendError::Closed
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_connection_ids() {
        let (c1, _rx1) = Connection::channel(1);
        let (c2, _rx2) = Connection::channel(1);
        assert_ne!(c1.id(), c2.id());
    }

    #[test]
    fn test_full_buffer_fails_fast() {
        let (conn, _rx) = Connection::channel(1);
        let frame = Arc::new(ServerFrame::pong(1));

        assert!(conn.try_send(frame.clone()).is_ok());
        assert_eq!(conn.try_send(frame), Err(SendError::Full));
        assert!(conn.is_open());
    }

    #[test]
    fn test_closed_connection() {
        let (conn, rx) = Connection::channel(4);
        conn.close();
        assert!(!conn.is_open());
        assert_eq!(
            conn.try_send(Arc::new(ServerFrame::pong(1))),
            Err(SendError::Closed)
        );
        drop(rx);
    }

    #[test]
    fn test_dropped_receiver_closes() {
        let (conn, rx) = Connection::channel(4);
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(
            conn.try_send(Arc::new(ServerFrame::pong(1))),
            Err(SendError::Closed)
        );
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (conn, mut rx) = Connection::channel(4);
        conn.try_send(Arc::new(ServerFrame::pong(1))).unwrap();
        conn.try_send(Arc::new(ServerFrame::pong(2))).unwrap();

        assert_eq!(*rx.recv().await.unwrap(), ServerFrame::pong(1));
        assert_eq!(*rx.recv().await.unwrap(), ServerFrame::pong(2));
    }
}
