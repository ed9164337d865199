//! Counters for an append log file
//!
//! - Counters only, monotonic
//! - Passive: nothing in the log reads them to make decisions
//! - Thread-safe and lock-free (Relaxed atomics)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters owned by one `AppendLogFile`.
#[derive(Debug, Default)]
pub struct LogMetrics {
    appends: AtomicU64,
    bytes_appended: AtomicU64,
    flushes: AtomicU64,
    bytes_flushed: AtomicU64,
    reads: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    cache_invalidations: AtomicU64,
}

impl LogMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one append of `bytes` payload bytes
    pub fn record_append(&self, bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one flush that moved `bytes` from the pending buffer to disk
    pub fn record_flush(&self, bytes: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.bytes_flushed.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_reads(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hits(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_misses(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_evictions(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` cache entries dropped by overlapping writes
    pub fn add_cache_invalidations(&self, count: u64) {
        self.cache_invalidations.fetch_add(count, Ordering::Relaxed);
    }

    /// Get all counters as a snapshot
    pub fn snapshot(&self) -> LogMetricsSnapshot {
        LogMetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            bytes_flushed: self.bytes_flushed.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            cache_invalidations: self.cache_invalidations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`LogMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogMetricsSnapshot {
    pub appends: u64,
    pub bytes_appended: u64,
    pub flushes: u64,
    pub bytes_flushed: u64,
    pub reads: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub cache_invalidations: u64,
}

impl LogMetricsSnapshot {
    /// Serialize the snapshot as a single JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
