//! Audit trail recording.
//!
//! Appends one entry per attempted operation, success or failure, when
//! auditing is enabled. Recording is best-effort: a failure to write the
//! audit entry is logged and swallowed so it never masks the operation's
//! primary outcome.

use std::sync::Arc;

use tally_core::{AuditConfig, AuditStatus, Metadata, NewAuditLog, UserId};
use tally_store::Storage;

/// Appends audit entries for attempted operations.
#[derive(Debug)]
pub struct AuditRecorder<S: Storage> {
    storage: Arc<S>,
    config: AuditConfig,
}

impl<S: Storage> AuditRecorder<S> {
    /// Create a recorder over the given storage handle and policy.
    pub fn new(storage: Arc<S>, config: AuditConfig) -> Self {
        Self { storage, config }
    }

    /// Whether auditing is active at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Append an audit entry for an attempted operation.
    ///
    /// Complete no-op when auditing is disabled: no entry is created and
    /// no storage call is made. Write failures are logged and swallowed.
    pub async fn record(
        &self,
        user_id: UserId,
        action: &str,
        status: AuditStatus,
        metadata: Metadata,
        error_message: Option<String>,
        txn: Option<&S::Txn>,
    ) {
        if !self.config.enabled {
            return;
        }

        let entry = NewAuditLog {
            user_id,
            action: action.to_string(),
            status,
            metadata,
            error_message,
        };

        if let Err(err) = self.storage.create_audit_log(entry, txn).await {
            tracing::warn!(
                user_id = %user_id,
                action,
                error = %err,
                "failed to write audit entry"
            );
        }
    }
}
