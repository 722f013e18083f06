//! Metrics export for the Parley server.
//!
//! The relay records through the `metrics` facade (see
//! [`parley_core::metrics`]); this module describes those series and exports
//! them in Prometheus format.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::metrics::names;
use parley_core::SessionEnd;
use std::net::SocketAddr;
use tracing::info;

/// Server-side metric names.
pub mod server_names {
    pub const SESSIONS_ENDED: &str = "parley_sessions_ended_total";
    pub const HTTP_REQUESTS: &str = "parley_http_requests_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::FRAMES_INBOUND, "Decoded frames received, by type");
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Successful frame writes, by type");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Connections dropped after a failed write"
    );
    metrics::describe_counter!(names::PERSIST_FAILURES, "Messages the store rejected");
    metrics::describe_gauge!(names::GROUPS_ACTIVE, "Known groups");
    metrics::describe_counter!(names::GROUP_JOINS_TOTAL, "Total number of group joins");
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Time to resolve and write one message in seconds"
    );
    metrics::describe_counter!(server_names::SESSIONS_ENDED, "Sessions ended, by reason");
    metrics::describe_counter!(server_names::HTTP_REQUESTS, "HTTP API requests, by endpoint");

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

/// Record why a session ended.
pub fn record_session_end(end: &SessionEnd) {
    let reason = match end {
        SessionEnd::Closed => "closed",
        SessionEnd::Transport(_) => "transport",
        SessionEnd::QueueClosed => "queue_closed",
    };
    counter!(server_names::SESSIONS_ENDED, "reason" => reason).increment(1);
}

/// Record an HTTP API request.
pub fn record_request(endpoint: &'static str) {
    counter!(server_names::HTTP_REQUESTS, "endpoint" => endpoint).increment(1);
}
