//! Error types for the controllers.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::aws::AwsError;
use crate::config::ConfigError;
use crate::controller::outcome::ValidationError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// AWS API error that was not classified as a validation outcome
    #[error("AWS error: {0}")]
    Aws(#[from] AwsError),

    /// Operator configuration could not be used
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Classified validation failure whose policy is requeue-with-error
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, conflicts, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Aws(e) => e.is_transient(),
            Error::Validation(_) => true,
            Error::Config(_) | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
