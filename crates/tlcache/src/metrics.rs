//! Memoization counters

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// Snapshot of memoization activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls answered from the memory tier
    pub hits: u64,
    /// Calls that found no live value
    pub misses: u64,
    /// Invocations of wrapped functions
    pub computations: u64,
    /// Calls recomputed inside a forced-refresh scope
    pub refreshes: u64,
    /// Failed calls answered with a stale value
    pub stale_served: u64,
    /// Failed calls whose error reached the caller
    pub failures: u64,
    /// Write-throughs the disk tier rejected
    pub store_failures: u64,
    /// Timestamp of cache creation
    pub created_at: SystemTime,
}

impl CacheStats {
    /// Calculate hit rate as a percentage (0.0 to 100.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Share of computations that failed (0.0 to 100.0)
    pub fn failure_rate(&self) -> f64 {
        if self.computations == 0 {
            0.0
        } else {
            ((self.stale_served + self.failures) as f64 / self.computations as f64) * 100.0
        }
    }

    /// Get uptime since cache creation
    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or(Duration::from_secs(0))
    }

    pub fn summary(&self) -> String {
        format!(
            "Cache Metrics:\n  Hits: {}\n  Misses: {}\n  Hit Rate: {:.2}%\n  Computations: {}\n  Refreshes: {}\n  Stale Served: {}\n  Failures: {}\n  Store Failures: {}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.computations,
            self.refreshes,
            self.stale_served,
            self.failures,
            self.store_failures
        )
    }
}

/// Thread-safe memoization counters
#[derive(Debug)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    refreshes: AtomicU64,
    stale_served: AtomicU64,
    failures: AtomicU64,
    store_failures: AtomicU64,
    created_at: SystemTime,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            created_at: SystemTime::now(),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation(&self) {
        self.computations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            created_at: self.created_at,
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.computations,
            &self.refreshes,
            &self.stale_served,
            &self.failures,
            &self.store_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let metrics = CacheMetrics::new();
        for _ in 0..3 {
            metrics.record_hit();
        }
        metrics.record_miss();

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 75.0);
    }

    #[test]
    fn test_empty_rates_are_zero() {
        let stats = CacheMetrics::new().snapshot();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.failure_rate(), 0.0);
    }

    #[test]
    fn test_failure_rate_counts_stale_and_propagated() {
        let metrics = CacheMetrics::new();
        for _ in 0..4 {
            metrics.record_computation();
        }
        metrics.record_stale_served();
        metrics.record_failure();

        assert_eq!(metrics.snapshot().failure_rate(), 50.0);
    }

    #[test]
    fn test_reset() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_store_failure();
        metrics.reset();

        let stats = metrics.snapshot();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.store_failures, 0);
    }

    #[test]
    fn test_summary_mentions_counters() {
        let metrics = CacheMetrics::new();
        metrics.record_refresh();
        let summary = metrics.snapshot().summary();
        assert!(summary.contains("Refreshes: 1"));
        assert!(summary.contains("Hit Rate: 0.00%"));
    }
}
