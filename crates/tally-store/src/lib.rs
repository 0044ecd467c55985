//! Storage collaborator contract for tally.
//!
//! The engine depends only on the [`Storage`] trait; backends are swapped
//! per deployment. Every method accepts an optional transaction-context
//! handle ([`Storage::Txn`]) threaded through unchanged, so a caller
//! wrapping a whole operation in one storage-level transaction gets
//! atomicity for free. Backends without transactions use `()`.
//!
//! Correctness of concurrent mutations on the same user depends entirely
//! on the backend providing atomic, serializable per-user updates; the
//! engine performs no locking of its own.
//!
//! # Example
//!
//! ```
//! use tally_core::{User, UserId};
//! use tally_store::{MemoryStorage, Storage};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let storage = MemoryStorage::new();
//!
//! let user = User::new(UserId::generate());
//! storage.put_user(user.clone());
//!
//! let loaded = storage.get_user_by_id(&user.id, None).await.unwrap();
//! assert_eq!(loaded, Some(user));
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;

pub use error::{Result, StoreError};
pub use memory::MemoryStorage;

use async_trait::async_trait;

use tally_core::{
    AuditLog, ExpirationUpdate, IdempotencyRecord, NewAuditLog, NewTransaction, Transaction,
    TransactionQuery, User, UserId,
};

/// The storage collaborator contract.
///
/// This trait abstracts the transactional backend the engine orchestrates
/// over: user records, the transaction ledger, the audit log, and
/// idempotency records.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Opaque transaction-context handle threaded through every call.
    type Txn: Send + Sync;

    // =========================================================================
    // User Operations
    // =========================================================================

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn get_user_by_id(&self, id: &UserId, txn: Option<&Self::Txn>)
        -> Result<Option<User>>;

    /// Apply a signed delta to a user's credit balance atomically.
    ///
    /// Returns the user after the update.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn update_user_credits(
        &self,
        id: &UserId,
        delta: i64,
        txn: Option<&Self::Txn>,
    ) -> Result<User>;

    /// Replace a user's membership tier and balance atomically.
    ///
    /// The balance is *set* to `credits`, not adjusted by it. The
    /// expiration field follows `expires_at`: preserved, cleared, or
    /// overwritten. Returns the user after the update.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn update_user_membership(
        &self,
        id: &UserId,
        tier: &str,
        credits: i64,
        expires_at: ExpirationUpdate,
        txn: Option<&Self::Txn>,
    ) -> Result<User>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// Append a transaction ledger entry, assigning its ID and creation
    /// time.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn create_transaction(
        &self,
        entry: NewTransaction,
        txn: Option<&Self::Txn>,
    ) -> Result<Transaction>;

    /// List a user's transactions, newest-first, with combinable filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn get_transactions(
        &self,
        user_id: &UserId,
        query: &TransactionQuery,
        txn: Option<&Self::Txn>,
    ) -> Result<Vec<Transaction>>;

    // =========================================================================
    // Audit Operations
    // =========================================================================

    /// Append an audit log entry, assigning its ID and creation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn create_audit_log(
        &self,
        entry: NewAuditLog,
        txn: Option<&Self::Txn>,
    ) -> Result<AuditLog>;

    // =========================================================================
    // Idempotency Operations
    // =========================================================================

    /// Get an idempotency record by key.
    ///
    /// Expired records are treated as absent and may be deleted during
    /// the lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn get_idempotency_record(
        &self,
        key: &str,
        txn: Option<&Self::Txn>,
    ) -> Result<Option<IdempotencyRecord>>;

    /// Insert an idempotency record, overwriting any existing record for
    /// the same key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend operation fails.
    async fn create_idempotency_record(
        &self,
        record: IdempotencyRecord,
        txn: Option<&Self::Txn>,
    ) -> Result<IdempotencyRecord>;
}
