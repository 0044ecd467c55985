//! Engine configuration for tally.
//!
//! An immutable [`EngineConfig`] is passed to the engine at construction;
//! there is no mutable module-level state. Construction-time validation
//! covers the membership section: every tier in the hierarchy must have a
//! non-negative credits cap. Extra caps for unknown tiers are tolerated.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::LedgerError;

/// Cost catalog entry for one chargeable action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCost {
    /// Cost charged when no tier override applies.
    pub default: i64,

    /// Tier-specific overrides, keyed by tier name.
    #[serde(default)]
    pub tiers: HashMap<String, i64>,
}

/// Membership tier configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Tier hierarchy: name to integer level. Comparisons use the level,
    /// never lexical order.
    #[serde(default)]
    pub tiers: HashMap<String, i64>,

    /// Per-action membership requirements: action name to required tier.
    /// Actions absent from the map have no requirement.
    #[serde(default)]
    pub requirements: HashMap<String, String>,

    /// The fixed balance a user is set to upon entering a tier.
    #[serde(default)]
    pub credits_caps: HashMap<String, i64>,
}

impl MembershipConfig {
    /// Look up a tier's level in the hierarchy.
    #[must_use]
    pub fn level(&self, tier: &str) -> Option<i64> {
        self.tiers.get(tier).copied()
    }

    /// Look up a tier's credits cap.
    #[must_use]
    pub fn cap(&self, tier: &str) -> Option<i64> {
        self.credits_caps.get(tier).copied()
    }

    /// The required tier for an action, if one is configured.
    #[must_use]
    pub fn requirement(&self, action: &str) -> Option<&str> {
        self.requirements.get(action).map(String::as_str)
    }

    /// Validate that every tier has a non-negative credits cap.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` naming the offending tier when
    /// a cap is missing or negative.
    pub fn validate(&self) -> Result<(), LedgerError> {
        for tier in self.tiers.keys() {
            match self.credits_caps.get(tier) {
                None => {
                    return Err(LedgerError::Configuration(format!(
                        "membership tier \"{tier}\" has no credits cap configured"
                    )));
                }
                Some(cap) if *cap < 0 => {
                    return Err(LedgerError::Configuration(format!(
                        "credits cap for tier \"{tier}\" must be non-negative (got {cap})"
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Retry policy for transient storage failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Whether retries are enabled at all.
    pub enabled: bool,

    /// Total number of attempts, the first included.
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Idempotency cache policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Whether the cache is consulted and written at all.
    pub enabled: bool,

    /// Record time-to-live in seconds.
    pub ttl_seconds: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 86_400,
        }
    }
}

/// Audit trail policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Whether audit entries are written at all.
    pub enabled: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cost catalog: action name to cost entry.
    pub costs: HashMap<String, ActionCost>,

    /// Membership tiers, requirements, and credits caps.
    pub membership: MembershipConfig,

    /// Retry policy.
    pub retry: RetryConfig,

    /// Idempotency cache policy.
    pub idempotency: IdempotencyConfig,

    /// Audit trail policy.
    pub audit: AuditConfig,
}

impl EngineConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` when the membership section is
    /// inconsistent (see [`MembershipConfig::validate`]).
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.membership.validate()
    }

    /// Resolve the cost of an action for a user's tier.
    ///
    /// A tier-specific override wins over the action's default. Returns
    /// `None` when the action is absent from the catalog.
    #[must_use]
    pub fn action_cost(&self, action: &str, tier: Option<&str>) -> Option<i64> {
        let entry = self.costs.get(action)?;
        let cost = tier
            .and_then(|t| entry.tiers.get(t).copied())
            .unwrap_or(entry.default);
        Some(cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(tiers: &[(&str, i64)], caps: &[(&str, i64)]) -> MembershipConfig {
        MembershipConfig {
            tiers: tiers.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
            requirements: HashMap::new(),
            credits_caps: caps.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        }
    }

    #[test]
    fn missing_cap_is_a_configuration_error() {
        let config = membership(&[("free", 0), ("premium", 1)], &[("free", 100)]);
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION");
        assert!(err.to_string().contains("premium"));
    }

    #[test]
    fn negative_cap_is_a_configuration_error() {
        let config = membership(&[("free", 0)], &[("free", -1)]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("free"));
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn extra_caps_are_tolerated() {
        let config = membership(&[("free", 0)], &[("free", 100), ("legacy", 9000)]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_membership_is_valid() {
        assert!(MembershipConfig::default().validate().is_ok());
    }

    #[test]
    fn action_cost_tier_override_wins() {
        let mut costs = HashMap::new();
        costs.insert(
            "api-call".to_string(),
            ActionCost {
                default: 10,
                tiers: [("premium".to_string(), 5)].into_iter().collect(),
            },
        );
        let config = EngineConfig {
            costs,
            ..EngineConfig::default()
        };

        assert_eq!(config.action_cost("api-call", None), Some(10));
        assert_eq!(config.action_cost("api-call", Some("free")), Some(10));
        assert_eq!(config.action_cost("api-call", Some("premium")), Some(5));
        assert_eq!(config.action_cost("unknown", None), None);
    }

    #[test]
    fn retry_defaults() {
        let retry = RetryConfig::default();
        assert!(retry.enabled);
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_delay_ms, 100);
        assert_eq!(retry.max_delay_ms, 5000);
        assert!((retry.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn config_deserializes_from_json() {
        let json = serde_json::json!({
            "costs": { "api-call": { "default": 10, "tiers": { "premium": 5 } } },
            "membership": {
                "tiers": { "free": 0, "premium": 1 },
                "requirements": { "export": "premium" },
                "credits_caps": { "free": 100, "premium": 1000 }
            },
            "retry": { "max_attempts": 5 },
            "idempotency": { "ttl_seconds": 3600 },
            "audit": { "enabled": false }
        });
        let config: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.enabled); // default fills unset fields
        assert_eq!(config.idempotency.ttl_seconds, 3600);
        assert!(!config.audit.enabled);
        assert_eq!(config.membership.requirement("export"), Some("premium"));
        assert!(config.validate().is_ok());
    }
}
