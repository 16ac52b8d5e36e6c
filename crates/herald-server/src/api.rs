//! HTTP side channel: presence, notifications and event publishing.

use crate::metrics;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use herald_core::BackendError;
use herald_protocol::{DomainEvent, Notification, NotificationPayload};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Errors returned by the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request is missing a required field.
    #[error("{0}")]
    BadRequest(&'static str),

    /// The bus did not accept the event.
    #[error("Event bus unavailable")]
    BusUnavailable,

    /// A store could not be reached.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BusUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Backend(e) => {
                error!(error = %e, "Backend failure in HTTP request");
                metrics::record_error("backend");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// An online identity as listed by `GET /users/online`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub username: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: u64,
}

/// Body of `POST /api/notifications/:username`.
#[derive(Debug, Default, Deserialize)]
pub struct NotifyRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `GET /users/online`
pub async fn online_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<OnlineUser>>, ApiError> {
    let users = state
        .presence
        .online()
        .await?
        .into_iter()
        .map(|record| OnlineUser {
            username: record.identity,
            last_seen: record.last_seen,
        })
        .collect();
    Ok(Json(users))
}

/// `POST /users/:username/presence`
pub async fn refresh_presence(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.presence.heartbeat(&username).await?;
    Ok(Json(json!({ "status": "online", "timestamp": record.last_seen })))
}

/// `DELETE /users/:username/presence`
pub async fn clear_presence(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.presence.logout(&username).await?;
    Ok(Json(json!({ "status": "offline" })))
}

/// `POST /api/notifications/:username`
///
/// Delivers immediately when the recipient is connected to this process,
/// otherwise queues the notification.
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    Json(request): Json<NotifyRequest>,
) -> Result<Response, ApiError> {
    let (Some(title), Some(message)) = (
        request.title.filter(|t| !t.is_empty()),
        request.message.filter(|m| !m.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("Title and message are required"));
    };

    let delivery = state
        .router
        .notify(Notification::new(username, title, message))
        .await?;
    metrics::record_routed("notification", delivery);

    Ok(notify_response(delivery.queued))
}

/// `GET /api/notifications/:username`
///
/// Returns and clears every pending notification, newest first.
pub async fn drain_notifications(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Vec<NotificationPayload>>, ApiError> {
    let pending = state.router.drain_pending(&username).await?;
    debug!(identity = %username, count = pending.len(), "Drained pending notifications");
    Ok(Json(pending.iter().map(Notification::payload).collect()))
}

/// `POST /api/events`
///
/// Publishes a bus envelope on the channel for its kind. Notifications do
/// not travel on the bus and are delivered or queued here instead.
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<DomainEvent>,
) -> Result<Response, ApiError> {
    if let DomainEvent::Notification(notification) = event {
        let delivery = state.router.notify(notification).await?;
        metrics::record_routed("notification", delivery);
        return Ok(notify_response(delivery.queued));
    }

    if !state.bridge.publish_event(&event).await {
        return Err(ApiError::BusUnavailable);
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "published" }))).into_response())
}

fn notify_response(queued: bool) -> Response {
    if queued {
        (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response()
    } else {
        (StatusCode::OK, Json(json!({ "status": "sent" }))).into_response()
    }
}
