//! Error types for the reconciliation core.

use thiserror::Error;

use crate::sync::{RetryClass, RoleKind, RowId};

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors surfaced by the reconciliation driver.
#[derive(Debug, Error)]
pub enum Error {
    /// Fetching a page of rows from the remote table failed.
    #[error("Row fetch failed: {message}")]
    Fetch {
        message: String,
        retry_class: RetryClass,
    },

    /// A raw row could not be projected onto [`crate::sync::Row`].
    #[error("Row projection failed: {0}")]
    Projection(String),

    /// The reconciliation engine task is no longer running.
    #[error("Reconciliation engine stopped")]
    EngineStopped,
}

impl Error {
    pub fn fetch(message: impl Into<String>, retry_class: RetryClass) -> Self {
        Self::Fetch {
            message: message.into(),
            retry_class,
        }
    }

    pub fn projection(message: impl Into<String>) -> Self {
        Self::Projection(message.into())
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Fetch { retry_class, .. } => *retry_class,
            Self::Projection(_) => RetryClass::Permanent,
            Self::EngineStopped => RetryClass::Permanent,
        }
    }
}

/// Errors returned by a [`crate::sync::MemberDirectory`] implementation.
///
/// "Not found" is not an error at this layer: lookups return `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("Directory API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Directory transport error: {0}")]
    Transport(String),
}

impl DirectoryError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Failure of a single role operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoleSyncError {
    /// No member in the community matches the identity.
    #[error("No member found for identity '{identity}'")]
    MemberNotFound { identity: String },

    /// The guild or the role could not be resolved, or the member match was ambiguous.
    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    /// The collaborator call itself failed.
    #[error("Network failure: {0}")]
    Network(#[from] DirectoryError),
}

impl RoleSyncError {
    pub fn lookup_failed(message: impl Into<String>) -> Self {
        Self::LookupFailed(message.into())
    }

    pub fn is_member_not_found(&self) -> bool {
        matches!(self, Self::MemberNotFound { .. })
    }
}

/// A role failure attributed to the row and role it was attempted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleFailure {
    pub row_id: RowId,
    pub identity: String,
    pub role: RoleKind,
    pub error: RoleSyncError,
}

impl std::fmt::Display for RoleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row {} ({} / {}): {}",
            self.row_id, self.identity, self.role, self.error
        )
    }
}
