//! Observability surface: counters the `simulate`/`inspect` CLI surfaces
//! read out, plus a snapshot type for `tracing` to log structured summaries
//! against. Ambient observability, tracked the same way a per-worker
//! throughput/latency stats struct would be.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters updated on the submit/dispatch/complete hot paths.
#[derive(Debug, Default)]
pub struct Metrics {
    pub submitted: AtomicU64,
    pub dispatched: AtomicU64,
    pub completed: AtomicU64,
    pub head_inserted: AtomicU64,
    pub dropped_large_samples: AtomicU64,
    total_latency_ns: AtomicU64,
    min_latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            min_latency_ns: AtomicU64::new(u64::MAX),
            ..Default::default()
        }
    }

    pub fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_head_insert(&self) {
        self.head_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self) {
        self.dropped_large_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one completion's latency into the running total/min/max
    /// using a lock-free compare-exchange loop.
    pub fn record_completion(&self, latency_ns: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(latency_ns, Ordering::Relaxed);

        let mut min = self.min_latency_ns.load(Ordering::Relaxed);
        while latency_ns < min {
            match self.min_latency_ns.compare_exchange_weak(
                min,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => min = x,
            }
        }

        let mut max = self.max_latency_ns.load(Ordering::Relaxed);
        while latency_ns > max {
            match self.max_latency_ns.compare_exchange_weak(
                max,
                latency_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => max = x,
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);
        let min = self.min_latency_ns.load(Ordering::Relaxed);
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed,
            head_inserted: self.head_inserted.load(Ordering::Relaxed),
            dropped_large_samples: self.dropped_large_samples.load(Ordering::Relaxed),
            avg_latency_ns: if completed > 0 { total_latency_ns / completed } else { 0 },
            min_latency_ns: if min == u64::MAX { 0 } else { min },
            max_latency_ns: self.max_latency_ns.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub head_inserted: u64,
    pub dropped_large_samples: u64,
    pub avg_latency_ns: u64,
    pub min_latency_ns: u64,
    pub max_latency_ns: u64,
}
