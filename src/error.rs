//! Error Types
//!
//! Error taxonomy shared by the dispatcher, renewer, and reconciler. Only
//! validation errors ever reject a whole request; everything else is folded
//! into per-item results by the caller.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Result type for subsync operations
pub type SubsyncResult<T> = Result<T, SubsyncError>;

/// Errors raised by the routing engine and its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubsyncError {
    /// Malformed caller input
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A collaborator call failed
    #[error("Upstream error during {operation}: {message}")]
    Upstream { operation: String, message: String },

    /// A collaborator call did not finish in time
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Referenced entity does not exist
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Serialization or deserialization failure
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Filesystem failure
    #[error("IO error: {message}")]
    Io { message: String },
}

impl SubsyncError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create an upstream error
    pub fn upstream<O: Into<String>, M: Into<String>>(operation: O, message: M) -> Self {
        Self::Upstream { operation: operation.into(), message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Whether this error rejects the whole request
    pub fn is_validation(&self) -> bool {
        matches!(self, SubsyncError::Validation { .. })
    }

    /// Whether this error becomes a per-item soft failure
    pub fn is_soft_failure(&self) -> bool {
        matches!(self,
            SubsyncError::Upstream { .. } |
            SubsyncError::Timeout { .. } |
            SubsyncError::NotFound { .. }
        )
    }
}

impl From<serde_json::Error> for SubsyncError {
    fn from(err: serde_json::Error) -> Self {
        SubsyncError::serialization(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for SubsyncError {
    fn from(err: std::io::Error) -> Self {
        SubsyncError::Io { message: err.to_string() }
    }
}

/// Run a collaborator call under a deadline
///
/// An elapsed deadline becomes `SubsyncError::Timeout` so callers can treat it
/// like any other soft failure.
pub async fn with_timeout<T, F>(operation: &str, duration: Duration, fut: F) -> SubsyncResult<T>
where
    F: Future<Output = SubsyncResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(SubsyncError::timeout(operation, duration)),
    }
}
