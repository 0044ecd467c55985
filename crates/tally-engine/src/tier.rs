//! Membership tier hierarchy validation.
//!
//! A pure function over the configured tier-name-to-level mapping. It
//! answers two questions: has a membership expired, and does the user's
//! tier satisfy a required tier. It never mutates the user.

use chrono::{DateTime, Utc};

use tally_core::User;

use std::collections::HashMap;

/// Outcome of a tier validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierCheck {
    /// Whether the user satisfies the requirement.
    pub valid: bool,

    /// The user's effective tier: none when the membership is expired or
    /// absent, else the stored tier.
    pub current_tier: Option<String>,

    /// The tier that was required, if any.
    pub required_tier: Option<String>,

    /// Whether the stored membership has expired.
    pub is_expired: bool,

    /// Why the check failed, when invalid.
    pub reason: Option<String>,
}

/// Validator over the configured tier hierarchy.
#[derive(Debug, Clone)]
pub struct TierValidator {
    tiers: HashMap<String, i64>,
}

impl TierValidator {
    /// Build a validator over a tier-name-to-level mapping.
    #[must_use]
    pub fn new(tiers: HashMap<String, i64>) -> Self {
        Self { tiers }
    }

    /// Look up a tier's level. `None` means the tier is undefined.
    #[must_use]
    pub fn level(&self, tier: &str) -> Option<i64> {
        self.tiers.get(tier).copied()
    }

    /// Whether a membership expiration has passed.
    ///
    /// None means no expiration and never expires. An instant at or
    /// before now counts as expired.
    #[must_use]
    pub fn is_expired(expires_at: Option<DateTime<Utc>>) -> bool {
        Self::is_expired_at(expires_at, Utc::now())
    }

    fn is_expired_at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        expires_at.is_some_and(|at| at <= now)
    }

    /// The user's effective tier: the stored tier unless the membership
    /// has expired, in which case none.
    #[must_use]
    pub fn effective_tier<'a>(&self, user: &'a User) -> Option<&'a str> {
        if Self::is_expired(user.membership_expires_at) {
            None
        } else {
            user.membership_tier.as_deref()
        }
    }

    /// Check whether `user` satisfies `required`.
    #[must_use]
    pub fn validate(&self, user: &User, required: Option<&str>) -> TierCheck {
        self.validate_at(user, required, Utc::now())
    }

    fn validate_at(&self, user: &User, required: Option<&str>, now: DateTime<Utc>) -> TierCheck {
        let is_expired = Self::is_expired_at(user.membership_expires_at, now);
        let current_tier = if is_expired {
            None
        } else {
            user.membership_tier.clone()
        };

        let Some(required) = required else {
            // Nothing required; always valid.
            return TierCheck {
                valid: true,
                current_tier,
                required_tier: None,
                is_expired,
                reason: None,
            };
        };

        let Some(current) = current_tier else {
            return TierCheck {
                valid: false,
                current_tier: None,
                required_tier: Some(required.to_string()),
                is_expired,
                reason: Some("no active membership".to_string()),
            };
        };

        let Some(current_level) = self.level(&current) else {
            return TierCheck {
                valid: false,
                current_tier: Some(current.clone()),
                required_tier: Some(required.to_string()),
                is_expired,
                reason: Some(format!(
                    "membership tier \"{current}\" is not defined in configuration"
                )),
            };
        };

        let Some(required_level) = self.level(required) else {
            return TierCheck {
                valid: false,
                current_tier: Some(current),
                required_tier: Some(required.to_string()),
                is_expired,
                reason: Some(format!(
                    "membership tier \"{required}\" is not defined in configuration"
                )),
            };
        };

        let valid = current_level >= required_level;
        TierCheck {
            valid,
            current_tier: Some(current.clone()),
            required_tier: Some(required.to_string()),
            is_expired,
            reason: if valid {
                None
            } else {
                Some(format!(
                    "membership tier \"{current}\" is below required tier \"{required}\""
                ))
            },
        }
    }
}
