use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::CacheStats;

/// Process-local cache counters. Lock-free; never persisted.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    operations: AtomicU64,
    total_response_time_us: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, elapsed: Duration) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed);
    }

    pub fn record_miss(&self, elapsed: Duration) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed);
    }

    /// A failed lookup counts as both an error and a miss.
    pub fn record_error(&self, elapsed: Duration) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed);
    }

    pub fn record_set(&self, elapsed: Duration) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed);
    }

    pub fn record_delete(&self, elapsed: Duration) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed);
    }

    pub fn record_store_error(&self, elapsed: Duration) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.record_timing(elapsed);
    }

    fn record_timing(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let operations = self.operations.load(Ordering::Relaxed);
        let total_response_time_us = self.total_response_time_us.load(Ordering::Relaxed);

        let lookups = hits + misses;
        let hit_rate = if lookups > 0 {
            hits as f64 / lookups as f64
        } else {
            0.0
        };
        let average_response_time_ms = if operations > 0 {
            total_response_time_us as f64 / operations as f64 / 1000.0
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            errors: self.errors.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            operations,
            total_response_time_us,
            hit_rate,
            average_response_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_and_mean_latency() {
        let metrics = CacheMetrics::new();
        metrics.record_hit(Duration::from_millis(2));
        metrics.record_hit(Duration::from_millis(2));
        metrics.record_hit(Duration::from_millis(2));
        metrics.record_miss(Duration::from_millis(6));

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.operations, 4);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
        assert!((stats.average_response_time_ms - 3.0).abs() < 1e-9);
    }

    #[test]
    fn errors_count_as_misses() {
        let metrics = CacheMetrics::new();
        metrics.record_error(Duration::ZERO);
        let stats = metrics.snapshot();
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }
}
