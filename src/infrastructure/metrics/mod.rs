//! Prometheus metrics for the notification client.
//!
//! - Connection metrics (state, transitions, reconnect attempts, handshake failures)
//! - Envelope metrics (received by type, malformed frames, listener failures)
//! - Notification store metrics (ingested, duplicates, evictions, unread)
//! - Sync metrics (REST fallback outcomes)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, EnvelopeMetrics, NotificationMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara_client";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Current connection state (see `ConnectionState::as_gauge`)
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Current connection state (0=idle,1=connecting,2=connected,3=reconnecting,4=disconnected,5=errored)"
    ).unwrap();

    /// State transitions by target state
    pub static ref STATE_TRANSITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_state_transitions_total", METRIC_PREFIX),
        "Total connection state transitions",
        &["state"]
    ).unwrap();

    /// Scheduled reconnection attempts
    pub static ref RECONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnect_attempts_total", METRIC_PREFIX),
        "Total scheduled reconnection attempts"
    ).unwrap();

    /// Handshake failures by error kind
    pub static ref HANDSHAKE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_handshake_failures_total", METRIC_PREFIX),
        "Total handshake failures",
        &["kind"]
    ).unwrap();

    /// Sessions downgraded to guest mode
    pub static ref GUEST_DOWNGRADES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_guest_downgrades_total", METRIC_PREFIX),
        "Total sessions downgraded to read-only guest mode"
    ).unwrap();

    // ============================================================================
    // Envelope Metrics
    // ============================================================================

    /// Inbound envelopes by type
    pub static ref ENVELOPES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_envelopes_received_total", METRIC_PREFIX),
        "Total inbound envelopes",
        &["type"]
    ).unwrap();

    /// Frames that could not be decoded
    pub static ref ENVELOPES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_envelopes_malformed_total", METRIC_PREFIX),
        "Total inbound frames dropped as malformed"
    ).unwrap();

    /// Listener errors and panics isolated during dispatch
    pub static ref LISTENER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_listener_failures_total", METRIC_PREFIX),
        "Total listener failures during dispatch"
    ).unwrap();

    // ============================================================================
    // Notification Store Metrics
    // ============================================================================

    pub static ref NOTIFICATIONS_INGESTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_ingested_total", METRIC_PREFIX),
        "Total notifications inserted into the store"
    ).unwrap();

    pub static ref NOTIFICATIONS_DUPLICATE_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_duplicate_total", METRIC_PREFIX),
        "Total re-delivered notifications dropped by id"
    ).unwrap();

    pub static ref NOTIFICATIONS_EVICTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_notifications_evicted_total", METRIC_PREFIX),
        "Total notifications evicted by capacity or sync"
    ).unwrap();

    pub static ref NOTIFICATIONS_UNREAD: IntGauge = register_int_gauge!(
        format!("{}_notifications_unread", METRIC_PREFIX),
        "Unread notifications in the store"
    ).unwrap();

    // ============================================================================
    // Sync Metrics
    // ============================================================================

    /// REST fallback syncs by outcome
    pub static ref SYNC_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_sync_total", METRIC_PREFIX),
        "Total REST notification syncs",
        &["outcome"]
    ).unwrap();
}
