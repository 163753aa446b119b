//! Policy reconciler
//!
//! Applies change events to the policy store. Each event names one identity;
//! the reconciler fetches the current resource, compiles it, and mutates the
//! store. The snapshot cache is invalidated only after a mutation commits.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{CompileError, ReconcileError};
use crate::metrics::CacheMetrics;
use crate::snapshot::SnapshotCache;
use crate::source::{PolicyCompiler, PolicyResource, PolicySource};
use crate::store::{PolicyKey, PolicyStore};

/// What happens to a stored policy when a newer revision fails to compile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompileFailurePolicy {
    /// Keep serving the last successfully compiled policy
    #[default]
    RetainPrevious,
    /// Drop the identity's policy until a revision compiles again
    Evict,
}

/// Reconciler configuration
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Handling of compile failures for identities with a stored policy
    pub compile_failure: CompileFailurePolicy,
}

/// Result of a successful reconcile cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A newly compiled policy was stored
    Upserted,
    /// The resource is gone and its policy was removed
    Removed,
    /// The resource is gone and there was no policy to remove
    Absent,
    /// The stored policy already reflects this revision
    Unchanged,
    /// The resource failed to compile; retrying cannot help
    Rejected {
        /// Structured compile errors
        errors: Vec<CompileError>,
        /// Whether a previously stored policy was evicted
        evicted: bool,
    },
}

impl ReconcileOutcome {
    /// Check if the store was mutated
    pub fn mutated(&self) -> bool {
        match self {
            Self::Upserted | Self::Removed => true,
            Self::Rejected { evicted, .. } => *evicted,
            Self::Absent | Self::Unchanged => false,
        }
    }
}

/// Drives store mutations from change events
pub struct Reconciler<R, P> {
    source: Arc<dyn PolicySource<R>>,
    compiler: Arc<dyn PolicyCompiler<R, P>>,
    store: Arc<PolicyStore<P>>,
    cache: Arc<SnapshotCache<P>>,
    metrics: Arc<CacheMetrics>,
    config: ReconcilerConfig,
}

impl<R, P> Reconciler<R, P>
where
    R: PolicyResource + 'static,
    P: Clone + Send + Sync + 'static,
{
    /// Create a reconciler
    pub fn new(
        source: Arc<dyn PolicySource<R>>,
        compiler: Arc<dyn PolicyCompiler<R, P>>,
        store: Arc<PolicyStore<P>>,
        cache: Arc<SnapshotCache<P>>,
        metrics: Arc<CacheMetrics>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            compiler,
            store,
            cache,
            metrics,
            config,
        }
    }

    /// Reconcile one identity against the source of truth
    ///
    /// Only fetch failures are returned as retryable errors. Compile failures
    /// are reported through [`ReconcileOutcome::Rejected`].
    #[instrument(skip_all, fields(key = %key))]
    pub async fn reconcile(
        &self,
        key: &PolicyKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconcileError::cancelled(key.clone())),
            fetched = self.source.fetch(key) => fetched,
        };

        let resource = match fetched {
            Ok(Some(resource)) => resource,
            Ok(None) => return Ok(self.remove(key)),
            Err(e) => {
                self.metrics.record_fetch_error();
                warn!(error = %e, "Failed to fetch policy, will retry");
                return Err(e.into());
            }
        };

        let revision = resource.revision().map(str::to_string);
        if revision.is_some() && self.store.revision(key) == revision {
            debug!(revision = ?revision, "Policy unchanged, skipping compilation");
            return Ok(ReconcileOutcome::Unchanged);
        }

        let compiled = self.compile(key, resource).await?;

        if cancel.is_cancelled() {
            return Err(ReconcileError::cancelled(key.clone()));
        }

        match compiled {
            Ok(policy) => {
                self.store.upsert(key.clone(), policy, revision.as_deref());
                self.cache.invalidate();
                self.metrics.record_upsert();
                Ok(ReconcileOutcome::Upserted)
            }
            Err(errors) => Ok(self.reject(key, revision.as_deref(), errors)),
        }
    }

    /// Compile a resource on the blocking pool
    ///
    /// A panicking compiler propagates its panic to the caller.
    async fn compile(
        &self,
        key: &PolicyKey,
        resource: R,
    ) -> Result<Result<P, Vec<CompileError>>, ReconcileError> {
        let compiler = self.compiler.clone();
        let task_key = key.clone();

        match tokio::task::spawn_blocking(move || compiler.compile(&task_key, &resource)).await {
            Ok(compiled) => Ok(compiled),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Only happens while the runtime shuts down
            Err(_) => Err(ReconcileError::cancelled(key.clone())),
        }
    }

    /// Handle a resource reported absent by the source
    fn remove(&self, key: &PolicyKey) -> ReconcileOutcome {
        if self.store.remove(key) {
            self.cache.invalidate();
            self.metrics.record_removal();
            ReconcileOutcome::Removed
        } else {
            ReconcileOutcome::Absent
        }
    }

    /// Handle a resource that failed to compile
    fn reject(
        &self,
        key: &PolicyKey,
        revision: Option<&str>,
        errors: Vec<CompileError>,
    ) -> ReconcileOutcome {
        self.metrics.record_compile_failure();

        for error in &errors {
            warn!(
                revision = ?revision,
                kind = %error.kind,
                error = %error.message,
                "Policy compile error"
            );
        }

        let evicted = match self.config.compile_failure {
            CompileFailurePolicy::RetainPrevious => {
                if self.store.contains(key) {
                    info!(
                        revision = ?revision,
                        "Keeping previously compiled policy after compile failure"
                    );
                }
                false
            }
            CompileFailurePolicy::Evict => {
                let evicted = self.store.remove(key);
                if evicted {
                    self.cache.invalidate();
                    self.metrics.record_removal();
                }
                evicted
            }
        };

        ReconcileOutcome::Rejected { errors, evicted }
    }
}
