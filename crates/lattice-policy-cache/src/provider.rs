//! Read-facing policy provider for the evaluation path

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;
use crate::snapshot::SnapshotCache;

/// Supplies the ordered set of compiled policies to an authorization server
///
/// Safe for unbounded concurrent use. Every call returns a sequence owned by
/// the caller; mutating it has no effect on the cache.
pub trait PolicyProvider<P>: Send + Sync {
    /// Compiled policies in evaluation order
    ///
    /// Fails only if `cancel` has already been triggered.
    fn compiled_policies(&self, cancel: &CancellationToken) -> Result<Vec<P>, ProviderError>;
}

/// [`PolicyProvider`] backed by a [`SnapshotCache`]
#[derive(Debug)]
pub struct CachedPolicyProvider<P> {
    cache: Arc<SnapshotCache<P>>,
}

impl<P> Clone for CachedPolicyProvider<P> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<P: Clone> CachedPolicyProvider<P> {
    /// Create a provider reading from a snapshot cache
    pub fn new(cache: Arc<SnapshotCache<P>>) -> Self {
        Self { cache }
    }
}

impl<P: Clone + Send + Sync> PolicyProvider<P> for CachedPolicyProvider<P> {
    fn compiled_policies(&self, cancel: &CancellationToken) -> Result<Vec<P>, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        Ok(self.cache.get().to_vec())
    }
}
