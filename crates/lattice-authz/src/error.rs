//! Error types for the AuthorizationPolicy controller

use thiserror::Error;

/// Controller error types
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Telemetry initialization error
    #[error("telemetry error: {message}")]
    Telemetry {
        /// Error message
        message: String,
    },
}

impl AuthzError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create a telemetry error
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry {
            message: msg.into(),
        }
    }
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, AuthzError>;
