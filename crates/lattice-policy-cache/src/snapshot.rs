//! Memoized, identity-ordered snapshots of the policy store
//!
//! Readers share the published snapshot through a read lock. When the
//! snapshot is stale, callers serialize on a separate compute lock so exactly
//! one of them re-sorts the store while the others wait for its result.
//!
//! Staleness is tracked with a generation counter. A snapshot is tagged with
//! the generation observed *before* the store was read, so a snapshot that
//! raced with a mutation is never served once that mutation's invalidation
//! has landed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::metrics::CacheMetrics;
use crate::store::PolicyStore;

/// A published snapshot and the generation it was computed for
struct Snapshot<P> {
    generation: u64,
    policies: Arc<[P]>,
}

/// Memoized ordered view over a [`PolicyStore`]
pub struct SnapshotCache<P> {
    store: Arc<PolicyStore<P>>,
    /// Bumped on every invalidation
    generation: AtomicU64,
    published: RwLock<Option<Snapshot<P>>>,
    /// Serializes recomputation; independent of the store lock
    compute: Mutex<()>,
    metrics: Arc<CacheMetrics>,
}

impl<P: Clone> SnapshotCache<P> {
    /// Create a snapshot cache over a store
    pub fn new(store: Arc<PolicyStore<P>>, metrics: Arc<CacheMetrics>) -> Self {
        Self {
            store,
            generation: AtomicU64::new(0),
            published: RwLock::new(None),
            compute: Mutex::new(()),
            metrics,
        }
    }

    /// Mark the current snapshot as stale
    ///
    /// Must be called after the store mutation it reflects has completed.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.metrics.record_invalidation();
        debug!(generation, "Policy snapshot invalidated");
    }

    /// Get the current snapshot, computing it if stale
    pub fn get(&self) -> Arc<[P]> {
        if let Some(policies) = self.current() {
            self.metrics.record_snapshot_hit();
            return policies;
        }

        let _compute = self.compute.lock();

        // Another caller may have published while we waited
        if let Some(policies) = self.current() {
            self.metrics.record_snapshot_hit();
            return policies;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let policies: Arc<[P]> = self.store.sorted_values().into();

        *self.published.write() = Some(Snapshot {
            generation,
            policies: policies.clone(),
        });

        self.metrics.record_snapshot_recompute();
        debug!(
            generation,
            count = policies.len(),
            "Policy snapshot recomputed"
        );

        policies
    }

    /// The published snapshot, if it is still valid
    fn current(&self) -> Option<Arc<[P]>> {
        let generation = self.generation.load(Ordering::Acquire);
        self.published
            .read()
            .as_ref()
            .filter(|snapshot| snapshot.generation == generation)
            .map(|snapshot| snapshot.policies.clone())
    }
}

impl<P> std::fmt::Debug for SnapshotCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
