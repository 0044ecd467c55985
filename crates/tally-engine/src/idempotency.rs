//! Idempotency cache over the storage collaborator.
//!
//! Maps a caller-supplied key to the outcome a previous attempt produced,
//! with TTL-based expiry. The engine consults it before running a
//! mutating operation and saves the final outcome after, making the whole
//! operation safe to retry end-to-end: a replay returns the stored
//! outcome verbatim without touching the mutation, ledger, or audit
//! paths.
//!
//! The cache provides at-most-once semantics for repeated logical calls
//! with the same key. It is not mutual exclusion between distinct
//! concurrent calls.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tally_core::{IdempotencyConfig, IdempotencyRecord, LedgerError, Result};
use tally_store::Storage;

/// The tagged final outcome of an operation, as stored under an
/// idempotency key.
///
/// Both successes and failures are cached so a replay reproduces the
/// original result either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoredOutcome {
    /// The operation succeeded with this serialized payload.
    Success {
        /// The serialized receipt.
        payload: serde_json::Value,
    },

    /// The operation failed with this error.
    Failed {
        /// The original error.
        error: LedgerError,
    },
}

impl StoredOutcome {
    /// Capture an operation result for storage.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Serialization` if the success payload cannot
    /// be encoded.
    pub fn from_result<T: Serialize>(result: &Result<T>) -> Result<Self> {
        match result {
            Ok(payload) => Ok(Self::Success {
                payload: serde_json::to_value(payload)
                    .map_err(|e| LedgerError::Serialization(e.to_string()))?,
            }),
            Err(err) => Ok(Self::Failed { error: err.clone() }),
        }
    }

    /// Reproduce the original result from a stored outcome.
    ///
    /// # Errors
    ///
    /// Returns the original operation error for a `Failed` outcome, or
    /// `LedgerError::Serialization` if a `Success` payload no longer
    /// decodes as `T`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Success { payload } => serde_json::from_value(payload)
                .map_err(|e| LedgerError::Serialization(format!("corrupt cached payload: {e}"))),
            Self::Failed { error } => Err(error),
        }
    }
}

/// TTL-bounded cache of operation outcomes, keyed by idempotency key.
#[derive(Debug)]
pub struct IdempotencyCache<S: Storage> {
    storage: Arc<S>,
    config: IdempotencyConfig,
}

impl<S: Storage> IdempotencyCache<S> {
    /// Create a cache over the given storage handle and policy.
    pub fn new(storage: Arc<S>, config: IdempotencyConfig) -> Self {
        Self { storage, config }
    }

    /// Whether the cache is active at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The configured record time-to-live in seconds.
    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.config.ttl_seconds
    }

    /// Look up the record for a key.
    ///
    /// Returns `None` when the cache is disabled, no record exists, or
    /// the record has expired. Expired records are purged by the storage
    /// lookup; the expiry check here covers backends that don't.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub async fn check(
        &self,
        key: &str,
        txn: Option<&S::Txn>,
    ) -> Result<Option<IdempotencyRecord>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let record = self.storage.get_idempotency_record(key, txn).await?;
        Ok(record.filter(|r| !r.is_expired()))
    }

    /// Store an outcome under a key, overwriting any existing record.
    ///
    /// No-op when the cache is disabled. The record expires
    /// `ttl_seconds` from now.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub async fn save(
        &self,
        key: &str,
        result: serde_json::Value,
        txn: Option<&S::Txn>,
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let record = IdempotencyRecord::new(key.to_string(), result, self.config.ttl_seconds);
        self.storage.create_idempotency_record(record, txn).await?;
        Ok(())
    }
}
