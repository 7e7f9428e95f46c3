//! Yandex Cloud client errors

use thiserror::Error;

/// gRPC status code the operation service reports for a missing resource
pub const CODE_NOT_FOUND: i32 = 5;
/// gRPC status code the operation service reports for a duplicate resource
pub const CODE_ALREADY_EXISTS: i32 = 6;

/// Errors that can occur when interacting with the Yandex Cloud API
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request/response error (connection refused, timeout, TLS, ...)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status that has no dedicated variant
    #[error("Yandex Cloud API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (missing, invalid or expired IAM token)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A lookup by unique name matched more than one resource
    #[error("Ambiguous lookup: {0}")]
    Ambiguous(String),

    /// A long-running operation finished with an error
    #[error("Operation {id} failed with code {code}: {message}")]
    Operation {
        /// Operation ID
        id: String,
        /// gRPC status code
        code: i32,
        /// Error message reported by the operation
        message: String,
    },

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl CloudError {
    /// Whether the error means the addressed resource does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::NotFound(_) => true,
            CloudError::Operation { code, .. } => *code == CODE_NOT_FOUND,
            _ => false,
        }
    }

    /// Whether the error means the resource being created already exists
    pub fn is_already_exists(&self) -> bool {
        match self {
            CloudError::AlreadyExists(_) => true,
            CloudError::Operation { code, .. } => *code == CODE_ALREADY_EXISTS,
            _ => false,
        }
    }

    /// Whether retrying the same call later can succeed
    ///
    /// Ambiguity and malformed requests need operator action, everything else
    /// (transport failures, throttling, conflicting operations) is worth another try.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CloudError::Ambiguous(_) | CloudError::InvalidRequest(_) | CloudError::Serialization(_)
        )
    }
}
