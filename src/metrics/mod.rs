//! Prometheus metrics for the relay.
//!
//! - Connection metrics (connected clients)
//! - Delivery metrics (sends, retries, acknowledgments, pending deliveries)
//! - Fallback metrics (publishes by reason, broker failures)

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics, FallbackMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "link_relay";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Clients with a live WebSocket channel
    pub static ref CONNECTED_CLIENTS: IntGauge = register_int_gauge!(
        format!("{}_connected_clients", METRIC_PREFIX),
        "Number of clients with a live WebSocket channel"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Frames written to client channels, labelled first/retry
    pub static ref DELIVERY_SENDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_sends_total", METRIC_PREFIX),
        "Delivery frames sent over live channels",
        &["kind"]
    ).unwrap();

    pub static ref DELIVERY_ACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_acks_total", METRIC_PREFIX),
        "Acknowledgments received, by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref DELIVERY_PENDING: IntGauge = register_int_gauge!(
        format!("{}_delivery_pending", METRIC_PREFIX),
        "Messages awaiting acknowledgment"
    ).unwrap();

    /// Sends made before a message was acknowledged
    pub static ref DELIVERY_ATTEMPTS_UNTIL_ACK: Histogram = register_histogram!(
        format!("{}_delivery_attempts_until_ack", METRIC_PREFIX),
        "Number of sends before acknowledgment",
        vec![1.0, 2.0, 3.0, 4.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Fallback Metrics
    // ============================================================================

    pub static ref FALLBACK_PUBLISHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_fallback_publishes_total", METRIC_PREFIX),
        "Broker fallback publishes, by reason",
        &["reason"]
    ).unwrap();

    pub static ref FALLBACK_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_fallback_failures_total", METRIC_PREFIX),
        "Broker fallback publishes that failed"
    ).unwrap();
}
