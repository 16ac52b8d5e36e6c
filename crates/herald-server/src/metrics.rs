//! Metrics collection and export for Herald.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use herald_core::Delivery;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "herald_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "herald_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "herald_connections_rejected_total";
    pub const REGISTRATIONS_TOTAL: &str = "herald_registrations_total";
    pub const EVENTS_ROUTED: &str = "herald_events_routed_total";
    pub const DELIVERIES_TOTAL: &str = "herald_deliveries_total";
    pub const NOTIFICATIONS_QUEUED: &str = "herald_notifications_queued_total";
    pub const PRESENCE_EXPIRED: &str = "herald_presence_expired_total";
    pub const MALFORMED_FRAMES: &str = "herald_malformed_frames_total";
    pub const ERRORS_TOTAL: &str = "herald_errors_total";
}

/// Describe every metric.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Upgrades refused by the connection limit"
    );
    metrics::describe_counter!(
        names::REGISTRATIONS_TOTAL,
        "Sockets bound to an identity"
    );
    metrics::describe_counter!(names::EVENTS_ROUTED, "Domain events routed, by event");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Frames written to local connections"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_QUEUED,
        "Notifications queued for offline recipients"
    );
    metrics::describe_counter!(
        names::PRESENCE_EXPIRED,
        "Identities marked offline by the sweeper"
    );
    metrics::describe_counter!(
        names::MALFORMED_FRAMES,
        "Inbound frames that could not be decoded"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a refused upgrade.
pub fn record_rejected_connection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record a socket registration.
pub fn record_registration() {
    counter!(names::REGISTRATIONS_TOTAL).increment(1);
}

/// Record the outcome of routing one event.
pub fn record_routed(event: &'static str, delivery: Delivery) {
    counter!(names::EVENTS_ROUTED, "event" => event).increment(1);
    counter!(names::DELIVERIES_TOTAL).increment(delivery.delivered as u64);
    if delivery.queued {
        counter!(names::NOTIFICATIONS_QUEUED).increment(1);
    }
}

/// Record identities expired by a sweep.
pub fn record_expired(count: usize) {
    counter!(names::PRESENCE_EXPIRED).increment(count as u64);
}

/// Record an undecodable inbound frame.
pub fn record_malformed(source: &'static str) {
    counter!(names::MALFORMED_FRAMES, "source" => source).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks a connection for its lifetime.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
