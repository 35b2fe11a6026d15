//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use beacon_core::ManagerStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const CONNECTIONS_REFUSED: &str = "beacon_connections_refused_total";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const MESSAGES_BYTES: &str = "beacon_messages_bytes";
    pub const APPLICATIONS_ACTIVE: &str = "beacon_applications_active";
    pub const CHANNELS_ACTIVE: &str = "beacon_channels_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "beacon_subscriptions_active";
    pub const LATENCY_SECONDS: &str = "beacon_latency_seconds";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Describe all metrics.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REFUSED,
        "Connections refused at admission, by error kind"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames handled");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of inbound frames");
    metrics::describe_gauge!(
        names::APPLICATIONS_ACTIVE,
        "Applications with at least one channel"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of live channels");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Connection slots summed over all channels"
    );
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame handling latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Errors reported to clients, by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an admitted connection.
fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a refused connection.
pub fn record_refused(kind: &'static str) {
    counter!(names::CONNECTIONS_REFUSED, "kind" => kind).increment(1);
}

/// Record an inbound frame.
pub fn record_inbound(bytes: usize) {
    counter!(names::MESSAGES_TOTAL, "direction" => "inbound").increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => "inbound").increment(bytes as u64);
}

/// Record frames written to a client.
pub fn record_outbound(frames: usize) {
    counter!(names::MESSAGES_TOTAL, "direction" => "outbound").increment(frames as u64);
}

/// Record frame handling latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Publish channel manager gauges.
pub fn record_stats(stats: &ManagerStats) {
    gauge!(names::APPLICATIONS_ACTIVE).set(stats.application_count as f64);
    gauge!(names::CHANNELS_ACTIVE).set(stats.channel_count as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(stats.connection_slots as f64);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
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
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        let _guard = ConnectionMetricsGuard::new();
        record_refused("invalid_app_key");
        record_inbound(42);
        record_outbound(3);
        record_stats(&ManagerStats::default());
    }
}
