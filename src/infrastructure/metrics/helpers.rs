//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTION_STATE, ENVELOPES_MALFORMED_TOTAL, ENVELOPES_RECEIVED_TOTAL,
    GUEST_DOWNGRADES_TOTAL, HANDSHAKE_FAILURES_TOTAL, LISTENER_FAILURES_TOTAL,
    NOTIFICATIONS_DUPLICATE_TOTAL, NOTIFICATIONS_EVICTED_TOTAL, NOTIFICATIONS_INGESTED_TOTAL,
    NOTIFICATIONS_UNREAD, RECONNECT_ATTEMPTS_TOTAL, STATE_TRANSITIONS_TOTAL, SYNC_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// Record a state transition
    pub fn record_transition(state_label: &str, gauge_value: i64) {
        STATE_TRANSITIONS_TOTAL
            .with_label_values(&[state_label])
            .inc();
        CONNECTION_STATE.set(gauge_value);
    }

    pub fn record_reconnect_attempt() {
        RECONNECT_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_handshake_failure(kind: &str) {
        HANDSHAKE_FAILURES_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_guest_downgrade() {
        GUEST_DOWNGRADES_TOTAL.inc();
    }
}

/// Helper struct for recording inbound envelope metrics
pub struct EnvelopeMetrics;

impl EnvelopeMetrics {
    pub fn record_received(kind: &str) {
        ENVELOPES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_malformed() {
        ENVELOPES_MALFORMED_TOTAL.inc();
    }

    pub fn record_listener_failure() {
        LISTENER_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording notification store metrics
pub struct NotificationMetrics;

impl NotificationMetrics {
    pub fn record_ingested() {
        NOTIFICATIONS_INGESTED_TOTAL.inc();
    }

    pub fn record_duplicate() {
        NOTIFICATIONS_DUPLICATE_TOTAL.inc();
    }

    pub fn record_evicted(count: u64) {
        NOTIFICATIONS_EVICTED_TOTAL.inc_by(count);
    }

    pub fn set_unread(count: usize) {
        NOTIFICATIONS_UNREAD.set(count as i64);
    }

    /// Record a REST sync outcome ("ok" or "error")
    pub fn record_sync(outcome: &str) {
        SYNC_TOTAL.with_label_values(&[outcome]).inc();
    }
}
