//! User types for tally.
//!
//! A user record is owned by the storage collaborator; the engine reads it
//! and requests mutations but never caches it across calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A user with a credit balance and an optional membership tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// The user ID.
    pub id: UserId,

    /// Current credit balance. May be negative; the engine enforces no floor.
    pub credits: i64,

    /// Current membership tier name, if any.
    pub membership_tier: Option<String>,

    /// When the membership expires. `None` means no expiration.
    pub membership_expires_at: Option<DateTime<Utc>>,

    /// When the user was created.
    pub created_at: DateTime<Utc>,

    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with zero credits and no membership.
    #[must_use]
    pub fn new(id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            credits: 0,
            membership_tier: None,
            membership_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance covers a cost.
    #[must_use]
    pub fn has_sufficient_credits(&self, cost: i64) -> bool {
        self.credits >= cost
    }
}

/// Caller intent for the membership expiration field on a tier change.
///
/// Distinguishes "field omitted" from "explicitly set to none": `Keep`
/// preserves the stored value unchanged, `Clear` overwrites it with none,
/// `Set` overwrites it with an instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationUpdate {
    /// Preserve the stored expiration unchanged.
    #[default]
    Keep,

    /// Overwrite the stored expiration with none.
    Clear,

    /// Overwrite the stored expiration with the given instant.
    Set(DateTime<Utc>),
}

impl ExpirationUpdate {
    /// Apply this update to a stored expiration value.
    #[must_use]
    pub fn apply(&self, stored: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            Self::Keep => stored,
            Self::Clear => None,
            Self::Set(at) => Some(*at),
        }
    }
}
