//! Error types for tally storage backends.

use tally_core::{LedgerError, UserId};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Backend operation failed. Classified transient by the engine.
    #[error("backend error: {0}")]
    Backend(String),

    /// The named user does not exist.
    #[error("user not found: {user_id}")]
    NotFound {
        /// The user ID that was not found.
        user_id: UserId,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(msg) => Self::Storage(msg),
            StoreError::NotFound { user_id } => Self::UserNotFound { user_id },
            StoreError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}
