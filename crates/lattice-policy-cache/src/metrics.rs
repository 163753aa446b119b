//! Policy cache metrics
//!
//! Counters for snapshot reuse and reconcile outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Policy cache metrics
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Snapshot reads served from the memoized snapshot
    pub snapshot_hits_total: AtomicU64,
    /// Snapshot recomputations
    pub snapshot_recomputes_total: AtomicU64,
    /// Snapshot invalidations
    pub invalidations_total: AtomicU64,
    /// Policies stored after a successful compile
    pub upserts_total: AtomicU64,
    /// Policies removed
    pub removals_total: AtomicU64,
    /// Resources rejected by the compiler
    pub compile_failures_total: AtomicU64,
    /// Reconciles that failed to fetch the resource
    pub fetch_errors_total: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot served from memo
    pub fn record_snapshot_hit(&self) {
        self.snapshot_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot recomputation
    pub fn record_snapshot_recompute(&self) {
        self.snapshot_recomputes_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a snapshot invalidation
    pub fn record_invalidation(&self) {
        self.invalidations_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stored policy
    pub fn record_upsert(&self) {
        self.upserts_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a removed policy
    pub fn record_removal(&self) {
        self.removals_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a compile rejection
    pub fn record_compile_failure(&self) {
        self.compile_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fetch failure
    pub fn record_fetch_error(&self) {
        self.fetch_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot recompute count
    pub fn snapshot_recomputes(&self) -> u64 {
        self.snapshot_recomputes_total.load(Ordering::Relaxed)
    }

    /// Get snapshot hit count
    pub fn snapshot_hits(&self) -> u64 {
        self.snapshot_hits_total.load(Ordering::Relaxed)
    }

    /// Get invalidation count
    pub fn invalidations(&self) -> u64 {
        self.invalidations_total.load(Ordering::Relaxed)
    }

    /// Get upsert count
    pub fn upserts(&self) -> u64 {
        self.upserts_total.load(Ordering::Relaxed)
    }

    /// Get removal count
    pub fn removals(&self) -> u64 {
        self.removals_total.load(Ordering::Relaxed)
    }

    /// Get compile failure count
    pub fn compile_failures(&self) -> u64 {
        self.compile_failures_total.load(Ordering::Relaxed)
    }

    /// Get fetch error count
    pub fn fetch_errors(&self) -> u64 {
        self.fetch_errors_total.load(Ordering::Relaxed)
    }

    /// Get snapshot hit rate (0.0 to 1.0)
    pub fn snapshot_hit_rate(&self) -> f64 {
        let hits = self.snapshot_hits();
        let total = hits + self.snapshot_recomputes();
        if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        }
    }
}
