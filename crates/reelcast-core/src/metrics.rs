//! Server-wide counters.
//!
//! Updates are single relaxed atomic operations; [`Metrics::snapshot`] copies
//! every counter into a plain serializable struct.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live counters shared by every connection task.
#[derive(Debug, Default)]
pub struct Metrics {
    active_connections: AtomicI64,
    bytes_transferred: AtomicU64,
    requests: AtomicU64,
    errors: AtomicU64,
    prefetch_hits: AtomicU64,
    prefetch_misses: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_connections: i64,
    pub bytes_transferred: u64,
    pub requests: u64,
    pub errors: u64,
    pub prefetch_hits: u64,
    pub prefetch_misses: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a connection as active. The returned guard decrements on drop.
    pub fn track_connection(&self) -> ConnectionGauge<'_> {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGauge { metrics: self }
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_transferred.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_hit(&self) {
        self.prefetch_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch_miss(&self) {
        self.prefetch_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
            prefetch_misses: self.prefetch_misses.load(Ordering::Relaxed),
        }
    }
}

/// Guard returned by [`Metrics::track_connection`].
#[derive(Debug)]
pub struct ConnectionGauge<'a> {
    metrics: &'a Metrics,
}

impl Drop for ConnectionGauge<'_> {
    fn drop(&mut self) {
        self.metrics
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.add_bytes(100);
        m.add_bytes(28);
        m.increment_requests();
        m.increment_errors();
        m.record_prefetch_hit();
        m.record_prefetch_miss();
        m.record_prefetch_miss();

        let snap = m.snapshot();
        assert_eq!(snap.bytes_transferred, 128);
        assert_eq!(snap.requests, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.prefetch_hits, 1);
        assert_eq!(snap.prefetch_misses, 2);
    }

    #[test]
    fn connection_gauge_decrements_on_drop() {
        let m = Metrics::new();
        let a = m.track_connection();
        let b = m.track_connection();
        assert_eq!(m.snapshot().active_connections, 2);
        drop(a);
        assert_eq!(m.snapshot().active_connections, 1);
        drop(b);
        assert_eq!(m.snapshot().active_connections, 0);
    }

    #[test]
    fn snapshot_serializes() {
        let m = Metrics::new();
        m.increment_requests();
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        assert!(json.contains("\"requests\":1"));
    }
}
