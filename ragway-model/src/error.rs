//! Error types for the `ragway-model` crate.

use thiserror::Error;

use crate::context::Interrupted;

/// Errors that can occur when talking to a generation/embedding backend
/// or routing through the [`Gateway`](crate::Gateway).
#[derive(Debug, Error)]
pub enum ModelError {
    /// The requested backend is not registered with the gateway.
    #[error("backend '{0}' is not configured")]
    NotConfigured(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The request was rejected before it reached the backend.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The HTTP transport failed (connection refused, timeout, reset).
    #[error("{backend} request failed: {message}")]
    Request {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("{backend} returned {status}: {message}")]
    Api {
        /// The backend that produced the error.
        backend: String,
        /// HTTP status code.
        status: u16,
        /// Error detail extracted from the response body.
        message: String,
    },

    /// The backend answered, but the payload could not be decoded.
    #[error("{backend} response could not be parsed: {message}")]
    Parse {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// The backend does not implement the requested capability.
    #[error("{backend} does not support {operation}")]
    Unsupported {
        /// The backend that produced the error.
        backend: String,
        /// The capability that was requested.
        operation: &'static str,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Every attempt against the backend failed.
    #[error("all retries exhausted for {backend} after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// The last backend that was attempted.
        backend: String,
        /// Number of attempts made against that backend.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<ModelError>,
    },
}

impl ModelError {
    /// Whether the error came from the caller's cancellation or deadline.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    /// Whether another attempt against the same backend could succeed.
    ///
    /// Transport and decoding failures are transient, as are timeouts, rate
    /// limits and server-side statuses. Other client errors, configuration
    /// problems, unsupported operations and interruptions are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request { .. } | Self::Parse { .. } => true,
            Self::Api { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<Interrupted> for ModelError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::Cancelled => Self::Cancelled,
            Interrupted::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// A convenience result type for gateway operations.
pub type Result<T> = std::result::Result<T, ModelError>;
