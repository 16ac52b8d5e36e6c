//! Connection handlers for Herald server.
//!
//! This module handles the socket lifecycle: upgrade, registration,
//! outbound frame delivery and cleanup on disconnect.

use crate::metrics::{self, ConnectionMetricsGuard};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use herald_core::Connection;
use herald_protocol::{codec, now_millis, ClientFrame, Identity, ServerFrame};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, trace, warn};

type Sink = SplitSink<WebSocket, Message>;

/// Health check handler.
pub async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let Some(slot) = state.try_acquire_slot() else {
        warn!(
            max_connections = state.config.limits.max_connections,
            "Connection limit reached, refusing upgrade"
        );
        metrics::record_rejected_connection();
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state, slot))
}

/// Per-socket state.
struct Session {
    connection: Arc<Connection>,
    identity: Option<Identity>,
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, _slot: OwnedSemaphorePermit) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (connection, mut outbound) = Connection::channel(state.config.limits.send_buffer);
    let mut session = Session {
        connection,
        identity: None,
    };

    debug!(connection = session.connection.id(), "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Frames routed to this connection
            Some(frame) = outbound.recv() => {
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text(&state, &mut session, &text).await {
                            if send_frame(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(connection = session.connection.id(), bytes = data.len(), "Ignoring binary message");
                        metrics::record_malformed("socket");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Control frames are answered by the WebSocket layer
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = session.connection.id(), "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = session.connection.id(), error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = session.connection.id(), "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    disconnect(&state, session).await;
}

/// Handle one inbound text frame, returning the direct reply if any.
async fn handle_text(state: &AppState, session: &mut Session, text: &str) -> Option<ServerFrame> {
    let frame = match codec::decode_frame(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection = session.connection.id(), error = %e, "Malformed client frame");
            metrics::record_malformed("socket");
            return Some(ServerFrame::error("Malformed frame"));
        }
    };

    match frame {
        ClientFrame::Register { username } => Some(register(state, session, username).await),

        ClientFrame::Ping { timestamp } => {
            if let Some(identity) = &session.identity {
                if owns(state, identity, &session.connection) {
                    if let Err(e) = state.presence.heartbeat(identity).await {
                        warn!(identity = %identity, error = %e, "Presence refresh failed");
                        metrics::record_error("presence");
                    }
                } else {
                    trace!(identity = %identity, connection = session.connection.id(), "Replaced connection, ping not counted");
                }
            }
            let timestamp = if timestamp == 0 { now_millis() } else { timestamp };
            Some(ServerFrame::pong(timestamp))
        }

        ClientFrame::Other => {
            trace!(connection = session.connection.id(), "Ignoring frame for another service");
            None
        }
    }
}

/// Bind the socket to `username`.
async fn register(state: &AppState, session: &mut Session, username: Identity) -> ServerFrame {
    if username.trim().is_empty() {
        return ServerFrame::error("username must not be empty");
    }

    // Re-registering under another name releases the old one.
    if let Some(previous) = session.identity.take() {
        if previous != username {
            release(state, &previous, &session.connection).await;
        }
    }

    if let Some(replaced) = state
        .registry
        .register(username.clone(), Arc::clone(&session.connection))
    {
        debug!(identity = %username, replaced = replaced.id(), "Newer connection took over identity");
        replaced.close();
    }

    if let Err(e) = state.presence.heartbeat(&username).await {
        warn!(identity = %username, error = %e, "Presence refresh failed");
        metrics::record_error("presence");
    }

    info!(identity = %username, connection = session.connection.id(), "Registered");
    metrics::record_registration();
    session.identity = Some(username);

    ServerFrame::registered()
}

/// Check that `connection` is still the one registered for `identity`.
fn owns(state: &AppState, identity: &str, connection: &Connection) -> bool {
    state
        .registry
        .lookup(identity)
        .is_some_and(|current| current.id() == connection.id())
}

/// Unregister and clear presence if this connection still owns `identity`.
async fn release(state: &AppState, identity: &str, connection: &Connection) {
    if !state.registry.unregister(identity, connection) {
        return;
    }

    if let Err(e) = state.presence.logout(identity).await {
        warn!(identity = %identity, error = %e, "Presence clear failed");
        metrics::record_error("presence");
    }
}

async fn disconnect(state: &AppState, session: Session) {
    session.connection.close();

    if let Some(identity) = &session.identity {
        release(state, identity, &session.connection).await;
    }

    debug!(connection = session.connection.id(), "WebSocket disconnected");
}

/// Send a frame to the WebSocket.
async fn send_frame(sender: &mut Sink, frame: &ServerFrame) -> Result<()> {
    let text = codec::encode_frame(frame)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}
