//! Shared harness for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tally_core::{ActionCost, EngineConfig, MembershipConfig, User, UserId};
use tally_engine::Engine;
use tally_store::MemoryStorage;

/// An engine over in-memory storage, plus direct access to that storage
/// for seeding and inspection.
pub struct TestHarness {
    pub storage: Arc<MemoryStorage>,
    pub engine: Engine<MemoryStorage>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let engine = Engine::new(Arc::clone(&storage), config).expect("test config is valid");
        Self { storage, engine }
    }

    /// Seed a user with no membership.
    pub fn seed_user(&self, credits: i64) -> User {
        let mut user = User::new(UserId::generate());
        user.credits = credits;
        self.storage.put_user(user.clone());
        user
    }

    /// Seed a user on the given tier.
    pub fn seed_member(
        &self,
        credits: i64,
        tier: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> User {
        let mut user = User::new(UserId::generate());
        user.credits = credits;
        user.membership_tier = Some(tier.to_string());
        user.membership_expires_at = expires_at;
        self.storage.put_user(user.clone());
        user
    }

    /// Re-read a user from storage.
    pub async fn reload(&self, user: &User) -> User {
        use tally_store::Storage;
        self.storage
            .get_user_by_id(&user.id, None)
            .await
            .expect("storage read")
            .expect("user exists")
    }
}

/// Hierarchy free(0) < basic(1) < pro(2) < premium(3); caps 100, 500,
/// 2000, 10000. "api-call" costs 10 (5 on premium); "report" costs 25 and
/// requires basic.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();

    config.costs.insert(
        "api-call".to_string(),
        ActionCost {
            default: 10,
            tiers: [("premium".to_string(), 5)].into_iter().collect(),
        },
    );
    config.costs.insert(
        "report".to_string(),
        ActionCost {
            default: 25,
            tiers: Default::default(),
        },
    );

    config.membership = MembershipConfig {
        tiers: [
            ("free".to_string(), 0),
            ("basic".to_string(), 1),
            ("pro".to_string(), 2),
            ("premium".to_string(), 3),
        ]
        .into_iter()
        .collect(),
        requirements: [("report".to_string(), "basic".to_string())]
            .into_iter()
            .collect(),
        credits_caps: [
            ("free".to_string(), 100),
            ("basic".to_string(), 500),
            ("pro".to_string(), 2000),
            ("premium".to_string(), 10_000),
        ]
        .into_iter()
        .collect(),
    };

    config
}
