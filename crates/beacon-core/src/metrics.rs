//! Metric instrumentation for Beacon.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host process installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const DELIVERIES_TOTAL: &str = "beacon_deliveries_total";
    pub const EVICTIONS_TOTAL: &str = "beacon_evictions_total";
    pub const ROOMS_ACTIVE: &str = "beacon_rooms_active";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Record a routed inbound message.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "type" => kind).increment(1);
}

/// Record frames queued for recipients.
pub fn record_deliveries(count: usize) {
    counter!(names::DELIVERIES_TOTAL).increment(count as u64);
}

/// Record a member evicted after a failed write.
pub fn record_eviction() {
    counter!(names::EVICTIONS_TOTAL).increment(1);
}

/// Record a new room.
pub fn room_created() {
    gauge!(names::ROOMS_ACTIVE).increment(1.0);
}

/// Record a deleted room.
pub fn room_deleted() {
    gauge!(names::ROOMS_ACTIVE).decrement(1.0);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
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
