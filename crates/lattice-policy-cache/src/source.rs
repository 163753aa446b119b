//! Collaborator traits for fetching and compiling policy resources

use crate::error::{CompileError, FetchError};
use crate::store::PolicyKey;

/// A policy resource as delivered by a [`PolicySource`]
pub trait PolicyResource: Send + Sync {
    /// Revision of the resource, used to skip recompiling unchanged resources
    fn revision(&self) -> Option<&str> {
        None
    }
}

/// Source of truth for policy resources
///
/// A missing resource is reported as `Ok(None)`, never as an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PolicySource<R: Send + Sync + 'static>: Send + Sync {
    /// Fetch the current revision of a resource
    async fn fetch(&self, key: &PolicyKey) -> Result<Option<R>, FetchError>;
}

/// Compiles policy resources into executable policies
///
/// Compilation is deterministic: the same resource always yields the same
/// outcome. Any error means the whole resource is rejected.
#[cfg_attr(test, mockall::automock)]
pub trait PolicyCompiler<R: Send + Sync + 'static, P: Send + Sync + 'static>: Send + Sync {
    /// Compile a resource
    fn compile(&self, key: &PolicyKey, resource: &R) -> Result<P, Vec<CompileError>>;
}
