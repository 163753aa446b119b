//! Error types for the policy cache

use thiserror::Error;

use crate::store::PolicyKey;

/// Failure to fetch a policy resource for reasons unrelated to its existence
///
/// A missing resource is not a fetch error; sources report it as `Ok(None)`.
#[derive(Debug, Error)]
#[error("failed to fetch policy {key}: {message}")]
pub struct FetchError {
    /// Identity that was being fetched
    pub key: PolicyKey,
    /// Error message from the backing store
    pub message: String,
}

impl FetchError {
    /// Create a fetch error
    pub fn new(key: PolicyKey, msg: impl Into<String>) -> Self {
        Self {
            key,
            message: msg.into(),
        }
    }
}

/// Category of a compile error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// Policy text could not be parsed
    Parse,
    /// Policy parsed but failed schema validation
    Validation,
}

impl std::fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse => write!(f, "parse"),
            Self::Validation => write!(f, "validation"),
        }
    }
}

/// A single structured error produced while compiling a policy resource
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct CompileError {
    /// Error category
    pub kind: CompileErrorKind,
    /// Error message
    pub message: String,
}

impl CompileError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::Parse,
            message: msg.into(),
        }
    }

    /// Create a schema validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self {
            kind: CompileErrorKind::Validation,
            message: msg.into(),
        }
    }
}

/// Errors returned from a reconcile cycle
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Fetching the resource failed; the dispatcher should retry
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The reconcile was cancelled before it could mutate the store
    #[error("reconcile of {key} cancelled")]
    Cancelled {
        /// Identity being reconciled
        key: PolicyKey,
    },
}

impl ReconcileError {
    /// Create a cancellation error
    pub fn cancelled(key: PolicyKey) -> Self {
        Self::Cancelled { key }
    }

    /// Check if the dispatcher should retry the event
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Fetch(_))
    }
}

/// Errors returned to the evaluation consumer
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The caller's context was cancelled before the read completed
    #[error("policy read cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::new(PolicyKey::namespaced("default", "api"), "connection refused");
        assert!(err.to_string().contains("default/api"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_compile_error_display() {
        let err = CompileError::parse("unexpected token");
        assert_eq!(err.to_string(), "parse error: unexpected token");

        let err = CompileError::validation("unknown entity type");
        assert_eq!(err.kind, CompileErrorKind::Validation);
        assert!(err.to_string().starts_with("validation error"));
    }

    #[test]
    fn test_retry_classification() {
        let key = PolicyKey::namespaced("ns", "p");
        assert!(ReconcileError::from(FetchError::new(key.clone(), "timeout")).is_retryable());
        assert!(!ReconcileError::cancelled(key).is_retryable());
    }
}
