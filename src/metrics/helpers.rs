//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    DELIVERY_ACKS_TOTAL, DELIVERY_ATTEMPTS_UNTIL_ACK, DELIVERY_PENDING, DELIVERY_SENDS_TOTAL,
    FALLBACK_FAILURES_TOTAL, FALLBACK_PUBLISHES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_send(attempt: u32) {
        let kind = if attempt == 0 { "first" } else { "retry" };
        DELIVERY_SENDS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_acknowledged(attempts: u32) {
        DELIVERY_ACKS_TOTAL.with_label_values(&["acknowledged"]).inc();
        DELIVERY_ATTEMPTS_UNTIL_ACK.observe(f64::from(attempts + 1));
    }

    pub fn record_ack_ignored(outcome: &str) {
        DELIVERY_ACKS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn set_pending(count: usize) {
        DELIVERY_PENDING.set(count as i64);
    }
}

pub struct FallbackMetrics;

impl FallbackMetrics {
    pub fn record_publish(reason: &str) {
        FALLBACK_PUBLISHES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_failure() {
        FALLBACK_FAILURES_TOTAL.inc();
    }
}
