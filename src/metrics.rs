//! Observability: operation counters and graph shape statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::Label;

/// Counts operations on an index. Shared across threads without locking.
#[derive(Debug, Default)]
pub struct IndexMetrics {
    total_searches: AtomicU64,
    total_inserts: AtomicU64,
    total_removals: AtomicU64,
    search_time_us: AtomicU64,
}

impl IndexMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a search with its duration.
    pub fn record_search(&self, duration: Duration) {
        self.total_searches.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.search_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.total_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_removal(&self) {
        self.total_removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_searches(&self) -> u64 {
        self.total_searches.load(Ordering::Relaxed)
    }

    pub fn total_inserts(&self) -> u64 {
        self.total_inserts.load(Ordering::Relaxed)
    }

    pub fn total_removals(&self) -> u64 {
        self.total_removals.load(Ordering::Relaxed)
    }

    /// Average search latency in microseconds.
    pub fn avg_search_latency_us(&self) -> f64 {
        let searches = self.total_searches();
        if searches == 0 {
            return 0.0;
        }
        self.search_time_us.load(Ordering::Relaxed) as f64 / searches as f64
    }
}

/// Point-in-time description of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    /// Live vectors.
    pub size: usize,
    /// Removed slots still occupying storage.
    pub tombstones: usize,
    pub capacity: usize,
    pub max_level: usize,
    /// Live nodes present on each layer, layer 0 first.
    pub nodes_per_layer: Vec<usize>,
    pub entry_label: Option<Label>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let m = IndexMetrics::new();
        m.record_insert();
        m.record_insert();
        m.record_removal();

        assert_eq!(m.total_inserts(), 2);
        assert_eq!(m.total_removals(), 1);
        assert_eq!(m.total_searches(), 0);
    }

    #[test]
    fn test_metrics_latency() {
        let m = IndexMetrics::new();
        m.record_search(Duration::from_micros(100));
        m.record_search(Duration::from_micros(200));
        m.record_search(Duration::from_micros(300));

        assert_eq!(m.total_searches(), 3);
        assert!((m.avg_search_latency_us() - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_metrics_empty() {
        let m = IndexMetrics::new();
        assert_eq!(m.avg_search_latency_us(), 0.0);
    }
}
