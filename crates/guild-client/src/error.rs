//! Error types for the guild client crate.

use rolesync_core::errors::DirectoryError;
use rolesync_core::sync::{classify_http_status, RetryClass};
use thiserror::Error;

/// Result type alias for guild client operations.
pub type Result<T> = std::result::Result<T, GuildClientError>;

#[derive(Debug, Error)]
pub enum GuildClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the guild service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Authentication error (missing or malformed bot token)
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl GuildClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

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
            Self::Json(_) => RetryClass::Permanent,
            Self::Auth(_) => RetryClass::ReauthRequired,
        }
    }
}

impl From<GuildClientError> for DirectoryError {
    fn from(err: GuildClientError) -> Self {
        match err {
            GuildClientError::Api { status, message } => DirectoryError::api(status, message),
            GuildClientError::Auth(message) => DirectoryError::api(401, message),
            other => DirectoryError::transport(other.to_string()),
        }
    }
}
