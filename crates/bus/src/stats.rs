//! Bus throughput counters and stats snapshot

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local counters maintained by the bus and its workers. Row
/// counts come from the store; these cover events the store rows cannot
/// express (drops, latency).
#[derive(Default)]
pub(crate) struct BusCounters {
    pub sent: AtomicU64,
    pub dropped: AtomicU64,
    pub dead_letter: AtomicU64,
    pub delivery_latency_ms_sum: AtomicU64,
    pub delivery_latency_count: AtomicU64,
}

impl BusCounters {
    pub fn record_delivery_latency(&self, latency_ms: u64) {
        self.delivery_latency_ms_sum
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.delivery_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_delivery_ms(&self) -> f64 {
        let count = self.delivery_latency_count.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            self.delivery_latency_ms_sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }
}

/// Point-in-time bus statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusStats {
    /// Rows created by send/broadcast since process start.
    pub sent: u64,
    pub pending: u64,
    pub delivered: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub expired: u64,
    pub dead: u64,
    /// Sends rejected for backpressure.
    pub dropped: u64,
    /// Rows dead-lettered after retry exhaustion.
    pub dead_letter: u64,
    pub conversations_active: u64,
    pub avg_delivery_ms: f64,
    /// (delivered + acknowledged) / sent, 1.0 when nothing was sent.
    pub success_rate: f64,
}
