//! # herald-server
//!
//! WebSocket and HTTP front end for the Herald fan-out service.
//!
//! ## Endpoints
//!
//! | Method | Path                           | Purpose                          |
//! |--------|--------------------------------|----------------------------------|
//! | GET    | `/ws` (configurable)           | WebSocket upgrade                |
//! | GET    | `/health`                      | Liveness                         |
//! | GET    | `/users/online`                | Online identities                |
//! | POST   | `/users/:username/presence`    | Heartbeat                        |
//! | DELETE | `/users/:username/presence`    | Logout                           |
//! | POST   | `/api/notifications/:username` | Send or queue a notification     |
//! | GET    | `/api/notifications/:username` | Drain pending notifications      |
//! | POST   | `/api/events`                  | Publish a bus envelope           |

pub mod api;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod state;

pub use config::Config;
pub use state::{AppState, Background};

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    let body_limit = state.config.limits.max_message_size;

    Router::new()
        .route(
            &state.config.transport.websocket_path,
            get(handlers::ws_handler),
        )
        .route("/health", get(handlers::health_handler))
        .route("/users/online", get(api::online_users))
        .route(
            "/users/:username/presence",
            post(api::refresh_presence).delete(api::clear_presence),
        )
        .route(
            "/api/notifications/:username",
            post(api::send_notification).get(api::drain_notifications),
        )
        .route("/api/events", post(api::publish_event))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Run the server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the backend, listener or server fails.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = AppState::build(config).await?;
    let background = state.start().await?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Herald server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    let result = serve(listener, state, shutdown_signal()).await;
    background.shutdown().await;
    info!("Herald server stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
