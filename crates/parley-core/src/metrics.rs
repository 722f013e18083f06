//! Instrumentation points for the relay.
//!
//! Records through the `metrics` facade. Without an installed recorder
//! every call is a no-op; the server installs a Prometheus exporter.

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const FRAMES_INBOUND: &str = "parley_frames_inbound_total";
    pub const DELIVERIES_TOTAL: &str = "parley_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "parley_evictions_total";
    pub const PERSIST_FAILURES: &str = "parley_persist_failures_total";
    pub const GROUPS_ACTIVE: &str = "parley_groups_active";
    pub const GROUP_JOINS_TOTAL: &str = "parley_group_joins_total";
    pub const DISPATCH_SECONDS: &str = "parley_dispatch_seconds";
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an inbound frame.
pub fn record_inbound(kind: &'static str) {
    counter!(names::FRAMES_INBOUND, "type" => kind).increment(1);
}

/// Record one dispatched message.
pub fn record_dispatch(kind: &'static str, delivered: usize, seconds: f64) {
    counter!(names::DELIVERIES_TOTAL, "type" => kind).increment(delivered as u64);
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record a connection evicted after a failed write.
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

/// Record a persistence failure.
pub fn record_persist_failure() {
    counter!(names::PERSIST_FAILURES).increment(1);
}

/// Record a group join and the resulting group count.
pub fn record_group_join(group_count: usize) {
    counter!(names::GROUP_JOINS_TOTAL).increment(1);
    gauge!(names::GROUPS_ACTIVE).set(group_count as f64);
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
