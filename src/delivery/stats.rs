use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the delivery coordinator
#[derive(Debug, Default)]
pub struct DeliveryStats {
    pub total_initiated: AtomicU64,
    /// Frames written to live channels, first sends and retries
    pub total_sent: AtomicU64,
    pub total_retries: AtomicU64,
    pub total_acknowledged: AtomicU64,
    /// Acks for unknown messages or from the wrong client
    pub total_ignored_acks: AtomicU64,
    pub total_exhausted: AtomicU64,
    pub total_fallbacks: AtomicU64,
    pub total_fallback_failures: AtomicU64,
}

impl DeliveryStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            total_initiated: self.total_initiated.load(Ordering::Relaxed),
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            total_acknowledged: self.total_acknowledged.load(Ordering::Relaxed),
            total_ignored_acks: self.total_ignored_acks.load(Ordering::Relaxed),
            total_exhausted: self.total_exhausted.load(Ordering::Relaxed),
            total_fallbacks: self.total_fallbacks.load(Ordering::Relaxed),
            total_fallback_failures: self.total_fallback_failures.load(Ordering::Relaxed),
            pending: pending as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryStatsSnapshot {
    pub total_initiated: u64,
    pub total_sent: u64,
    pub total_retries: u64,
    pub total_acknowledged: u64,
    pub total_ignored_acks: u64,
    pub total_exhausted: u64,
    pub total_fallbacks: u64,
    pub total_fallback_failures: u64,
    pub pending: u64,
}
