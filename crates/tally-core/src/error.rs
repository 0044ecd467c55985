//! Error types for tally.
//!
//! A single closed taxonomy covers every failure the engine can surface.
//! Each variant carries a machine-readable [`code`](LedgerError::code) and
//! a human message. The retry executor dispatches on
//! [`is_transient`](LedgerError::is_transient): only the storage tag is
//! retryable, domain and configuration failures never are.
//!
//! The enum is serializable so a cached failed outcome replays verbatim
//! through the idempotency cache.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur in ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum LedgerError {
    /// The subject user does not exist.
    #[error("user not found: {user_id}")]
    UserNotFound {
        /// The user ID that was not found.
        user_id: UserId,
    },

    /// A charge exceeds the user's balance.
    #[error("insufficient credits for user {user_id}: required={required}, available={available}")]
    InsufficientCredits {
        /// The subject user.
        user_id: UserId,
        /// The cost of the charge.
        required: i64,
        /// The balance available.
        available: i64,
    },

    /// An action's membership gate failed.
    #[error("user {user_id} requires membership tier \"{required}\" (current: {current:?})")]
    MembershipRequired {
        /// The subject user.
        user_id: UserId,
        /// The tier the action requires.
        required: String,
        /// The user's effective tier, if any.
        current: Option<String>,
    },

    /// No cost entry exists for the action.
    #[error("action \"{action}\" is not defined in the cost catalog")]
    UndefinedAction {
        /// The unrecognized action name.
        action: String,
    },

    /// A tier name is absent from the hierarchy.
    #[error("membership tier \"{tier}\" is not defined in configuration")]
    UndefinedTier {
        /// The unrecognized tier name.
        tier: String,
    },

    /// A wrong-direction tier change was requested.
    #[error("invalid tier change from {current:?} to \"{target}\": {reason}")]
    InvalidTierChange {
        /// The user's effective tier, if any.
        current: Option<String>,
        /// The requested target tier.
        target: String,
        /// Why the change is invalid.
        reason: String,
    },

    /// A refund or grant amount is negative.
    #[error("invalid amount: {amount}")]
    InvalidAmount {
        /// The offending amount.
        amount: i64,
    },

    /// The same idempotency key was used concurrently with different
    /// parameters. Reserved; the engine does not currently detect this.
    #[error("idempotency key conflict: {key} (existing: {existing})")]
    IdempotencyKeyConflict {
        /// The conflicting key.
        key: String,
        /// A description of the existing use.
        existing: String,
    },

    /// Invalid engine configuration. Fatal at construction, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A transient storage failure. The only retryable category.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LedgerError {
    /// The machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UserNotFound { .. } => "USER_NOT_FOUND",
            Self::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            Self::MembershipRequired { .. } => "MEMBERSHIP_REQUIRED",
            Self::UndefinedAction { .. } => "UNDEFINED_ACTION",
            Self::UndefinedTier { .. } => "UNDEFINED_TIER",
            Self::InvalidTierChange { .. } => "INVALID_TIER_CHANGE",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::IdempotencyKeyConflict { .. } => "IDEMPOTENCY_KEY_CONFLICT",
            Self::Configuration(_) => "CONFIGURATION",
            Self::Storage(_) => "STORAGE",
            Self::Serialization(_) => "SERIALIZATION",
        }
    }

    /// Whether this failure is transient and safe to retry.
    ///
    /// Only storage failures qualify. Domain errors (not-found,
    /// insufficient funds, invalid tier change) must propagate without
    /// consuming a retry attempt.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
