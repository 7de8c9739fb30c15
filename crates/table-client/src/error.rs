//! Error types for the table client crate.

use rolesync_core::sync::{classify_http_status, RetryClass};
use thiserror::Error;

/// Result type alias for table client operations.
pub type Result<T> = std::result::Result<T, TableClientError>;

/// Errors that can occur while reading the remote table.
#[derive(Debug, Error)]
pub enum TableClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the table service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A row could not be projected onto the row model
    #[error("Projection error: {0}")]
    Projection(String),

    /// Authentication error (missing or malformed token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl TableClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Api { status, .. } => classify_http_status(*status),
            Self::Http(_) => RetryClass::Retryable,
            Self::Json(_) | Self::Projection(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::ReauthRequired,
        }
    }
}

impl From<TableClientError> for rolesync_core::Error {
    fn from(err: TableClientError) -> Self {
        match err {
            TableClientError::Projection(message) => rolesync_core::Error::projection(message),
            other => {
                let retry_class = other.retry_class();
                rolesync_core::Error::fetch(other.to_string(), retry_class)
            }
        }
    }
}

impl From<rolesync_core::Error> for TableClientError {
    fn from(err: rolesync_core::Error) -> Self {
        match err {
            rolesync_core::Error::Projection(message) => Self::Projection(message),
            other => Self::Projection(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_class_follows_http_status() {
        assert_eq!(
            TableClientError::api(401, "bad token").retry_class(),
            RetryClass::ReauthRequired
        );
        assert_eq!(
            TableClientError::api(503, "maintenance").retry_class(),
            RetryClass::Retryable
        );
        assert_eq!(
            TableClientError::api(404, "no such table").retry_class(),
            RetryClass::Permanent
        );
    }

    #[test]
    fn converts_into_core_fetch_error() {
        let err: rolesync_core::Error = TableClientError::api(429, "slow down").into();
        assert_eq!(err.retry_class(), RetryClass::Retryable);
        assert!(err.to_string().contains("slow down"));
    }
}
