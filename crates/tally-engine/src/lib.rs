//! Credit-ledger orchestration engine for tally.
//!
//! Coordinates balance charges, refunds and grants, and membership tier
//! changes against a pluggable [`Storage`](tally_store::Storage) backend,
//! composing four collaborators around each operation: tier hierarchy
//! validation, an idempotency cache, bounded retry with exponential
//! backoff, and best-effort audit recording.
//!
//! ```
//! use std::sync::Arc;
//!
//! use tally_core::{EngineConfig, User, UserId};
//! use tally_engine::{ChargeRequest, Engine};
//! use tally_store::MemoryStorage;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tally_core::Result<()> {
//! let mut config = EngineConfig::default();
//! config
//!     .costs
//!     .entry("api-call".to_string())
//!     .or_default()
//!     .default = 10;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let mut user = User::new(UserId::generate());
//! user.credits = 100;
//! storage.put_user(user.clone());
//!
//! let engine = Engine::new(storage, config)?;
//! let receipt = engine
//!     .charge(ChargeRequest::new(user.id, "api-call"), None)
//!     .await?;
//! assert_eq!(receipt.balance_after, 90);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod engine;
pub mod idempotency;
pub mod retry;
pub mod tier;

pub use audit::AuditRecorder;
pub use engine::{
    ChargeReceipt, ChargeRequest, CreditReceipt, CreditRequest, Engine, TierChangeReceipt,
    TierChangeRequest,
};
pub use idempotency::{IdempotencyCache, StoredOutcome};
pub use retry::RetryExecutor;
pub use tier::{TierCheck, TierValidator};
