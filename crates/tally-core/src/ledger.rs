//! Ledger record types for tally.
//!
//! Three append-only record kinds back the engine's guarantees: the
//! transaction ledger (one entry per completed mutation), the audit log
//! (one entry per attempted operation), and idempotency records (cached
//! outcomes keyed by caller-supplied tokens).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditLogId, TransactionId, UserId};

/// Open key-value metadata attached to ledger and audit records.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A ledger entry recording a single balance change.
///
/// Exactly one transaction exists per completed mutation. Pure reads and
/// idempotent replays never create one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Operation tag: a charge action name, `refund`, `grant`,
    /// `tier-upgrade`, or `tier-downgrade`.
    pub action: String,

    /// Signed balance delta.
    pub amount: i64,

    /// Balance before the change.
    pub balance_before: i64,

    /// Balance after the change.
    pub balance_after: i64,

    /// Caller metadata merged with operation-derived fields.
    pub metadata: Metadata,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

/// A transaction entry as submitted to storage, before an ID and creation
/// time are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    /// The user whose balance is affected.
    pub user_id: UserId,

    /// Operation tag.
    pub action: String,

    /// Signed balance delta.
    pub amount: i64,

    /// Balance before the change.
    pub balance_before: i64,

    /// Balance after the change.
    pub balance_after: i64,

    /// Caller metadata merged with operation-derived fields.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Outcome of an attempted operation, as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// The operation completed.
    Success,

    /// The operation failed at some stage.
    Failed,
}

/// An audit log entry recording one attempted operation and its outcome.
///
/// Written for every attempted mutating operation when auditing is
/// enabled, including failures. Idempotent replays write no new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    /// Unique audit entry ID (ULID for time-ordering).
    pub id: AuditLogId,

    /// The subject user.
    pub user_id: UserId,

    /// Operation tag, matching the transaction ledger's tags.
    pub action: String,

    /// Whether the attempt succeeded or failed.
    pub status: AuditStatus,

    /// Structured context: on success at least the transaction ID plus
    /// operation fields, on failure the attempted target parameters.
    pub metadata: Metadata,

    /// The failure's message. Present only when `status` is `Failed`.
    pub error_message: Option<String>,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

/// An audit entry as submitted to storage, before an ID and creation time
/// are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditLog {
    /// The subject user.
    pub user_id: UserId,

    /// Operation tag.
    pub action: String,

    /// Whether the attempt succeeded or failed.
    pub status: AuditStatus,

    /// Structured context for the attempt.
    #[serde(default)]
    pub metadata: Metadata,

    /// The failure's message, when `status` is `Failed`.
    pub error_message: Option<String>,
}

/// A cached operation outcome keyed by a caller-supplied idempotency key.
///
/// The `result` payload is opaque to storage: it holds the serialized
/// final outcome (success or failure) of a prior attempt.
/// `serde_json::Value::Null` is a legal payload, distinct from "no
/// record". Records past `expires_at` are treated as absent and may be
/// physically removed on lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Caller-supplied key, unique per logical operation.
    pub key: String,

    /// Opaque serialized outcome of the prior attempt.
    pub result: serde_json::Value,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record expires: creation time plus the configured TTL.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Create a record expiring `ttl_seconds` from now.
    #[must_use]
    pub fn new(key: String, result: serde_json::Value, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Self {
            key,
            result,
            created_at: now,
            expires_at: now + Duration::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX)),
        }
    }

    /// Whether the record has expired as of now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the record has expired as of the given instant.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Filters for listing a user's transactions, newest-first.
///
/// All filters are combinable; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionQuery {
    /// Maximum number of entries to return.
    pub limit: Option<usize>,

    /// Number of matching entries to skip.
    pub offset: Option<usize>,

    /// Only entries created at or after this instant.
    pub start_date: Option<DateTime<Utc>>,

    /// Only entries created at or before this instant.
    pub end_date: Option<DateTime<Utc>>,

    /// Only entries with this operation tag.
    pub action: Option<String>,
}
