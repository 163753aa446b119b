//! Concurrent compiled-policy cache for Lattice authorization
//!
//! Holds compiled policies keyed by resource identity and serves them to the
//! request path as a deterministic, identity-ordered snapshot.
//!
//! # Data Flow
//!
//! ```text
//! change event ─► Reconciler ─► compile ─► PolicyStore ─► SnapshotCache::invalidate
//!                                                              │
//! request path ─► PolicyProvider ─► SnapshotCache::get ◄───────┘ (recompute once)
//! ```
//!
//! The source of policy resources and the compiler are supplied by the caller
//! through [`PolicySource`] and [`PolicyCompiler`].

#![deny(missing_docs)]

mod error;
mod metrics;
mod provider;
mod reconciler;
mod snapshot;
mod source;
mod store;

use std::sync::Arc;

pub use error::{CompileError, CompileErrorKind, FetchError, ProviderError, ReconcileError};
pub use metrics::CacheMetrics;
pub use provider::{CachedPolicyProvider, PolicyProvider};
pub use reconciler::{CompileFailurePolicy, ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use snapshot::SnapshotCache;
pub use source::{PolicyCompiler, PolicyResource, PolicySource};
pub use store::{PolicyKey, PolicyStore};

/// A fully wired policy cache
///
/// Owns one store and its snapshot cache, and hands out the reconciler that
/// writes to them and the provider that reads from them.
pub struct PolicyCache<R, P> {
    store: Arc<PolicyStore<P>>,
    cache: Arc<SnapshotCache<P>>,
    metrics: Arc<CacheMetrics>,
    reconciler: Arc<Reconciler<R, P>>,
}

impl<R, P> PolicyCache<R, P>
where
    R: PolicyResource + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Wire a cache around a source and compiler
    pub fn new(
        source: Arc<dyn PolicySource<R>>,
        compiler: Arc<dyn PolicyCompiler<R, P>>,
        config: ReconcilerConfig,
    ) -> Self {
        let store = Arc::new(PolicyStore::new());
        let metrics = Arc::new(CacheMetrics::new());
        let cache = Arc::new(SnapshotCache::new(store.clone(), metrics.clone()));
        let reconciler = Arc::new(Reconciler::new(
            source,
            compiler,
            store.clone(),
            cache.clone(),
            metrics.clone(),
            config,
        ));

        Self {
            store,
            cache,
            metrics,
            reconciler,
        }
    }

    /// The reconciler that applies change events
    pub fn reconciler(&self) -> Arc<Reconciler<R, P>> {
        self.reconciler.clone()
    }

    /// A provider for the evaluation path
    pub fn provider(&self) -> CachedPolicyProvider<P> {
        CachedPolicyProvider::new(self.cache.clone())
    }

    /// The underlying store
    pub fn store(&self) -> Arc<PolicyStore<P>> {
        self.store.clone()
    }

    /// Cache metrics
    pub fn metrics(&self) -> Arc<CacheMetrics> {
        self.metrics.clone()
    }
}
