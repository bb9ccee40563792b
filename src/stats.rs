//! Statistics tracking for the proxy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for tracking query outcomes.
pub struct Stats {
    pub requests: AtomicU64,
    pub answered: AtomicU64,
    pub abandoned: AtomicU64,
    pub rerouted: AtomicU64,
    /// Cumulative response time in microseconds for averaging.
    total_response_time_us: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            answered: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            rerouted: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
        }
    }

    pub fn record_answered(&self, response_time_ms: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.answered.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add((response_time_ms * 1000.0) as u64, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rerouted(&self) {
        self.rerouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        let requests = self.requests.swap(0, Ordering::Relaxed);
        let answered = self.answered.swap(0, Ordering::Relaxed);
        let abandoned = self.abandoned.swap(0, Ordering::Relaxed);
        let rerouted = self.rerouted.swap(0, Ordering::Relaxed);
        let total_us = self.total_response_time_us.swap(0, Ordering::Relaxed);

        let avg_response_ms = if answered > 0 {
            (total_us as f64 / answered as f64) / 1000.0
        } else {
            0.0
        };

        StatsSnapshot {
            requests,
            answered,
            abandoned,
            rerouted,
            avg_response_ms,
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StatsSnapshot {
    pub requests: u64,
    pub answered: u64,
    pub abandoned: u64,
    pub rerouted: u64,
    pub avg_response_ms: f64,
}
