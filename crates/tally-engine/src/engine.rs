//! The operation orchestrator.
//!
//! Composes the tier validator, idempotency cache, retry executor, and
//! audit recorder around the storage collaborator to run each public
//! operation end-to-end. Per mutating call the stages are, in order:
//!
//! 1. Idempotency short-circuit (replay a cached outcome verbatim)
//! 2. Load the subject user
//! 3. Operation-specific validation
//! 4. Storage mutation plus ledger entry, wrapped by the retry executor
//! 5. Audit write (always runs when enabled, success or failure)
//! 6. Idempotency save
//!
//! Any stage's failure short-circuits the later stages except the audit
//! write. `query_balance` is a pure read and skips everything but stage 2.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use tally_core::{
    AuditStatus, EngineConfig, ExpirationUpdate, LedgerError, Metadata, NewTransaction, Result,
    Transaction, TransactionId, TransactionQuery, User, UserId,
};
use tally_store::Storage;

use crate::audit::AuditRecorder;
use crate::idempotency::{IdempotencyCache, StoredOutcome};
use crate::retry::RetryExecutor;
use crate::tier::TierValidator;

// =============================================================================
// Requests
// =============================================================================

/// A charge against a user's balance for a configured action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// The subject user.
    pub user_id: UserId,

    /// The action being charged; must exist in the cost catalog.
    pub action: String,

    /// Caller metadata recorded on the ledger entry and audit entry.
    #[serde(default)]
    pub metadata: Metadata,

    /// Idempotency key making the charge safe to retry end-to-end.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl ChargeRequest {
    /// A charge with empty metadata and no idempotency key.
    #[must_use]
    pub fn new(user_id: UserId, action: impl Into<String>) -> Self {
        Self {
            user_id,
            action: action.into(),
            metadata: Metadata::new(),
            idempotency_key: None,
        }
    }
}

/// A refund or grant adding credits to a user's balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRequest {
    /// The subject user.
    pub user_id: UserId,

    /// Credits to add. Must be non-negative.
    pub amount: i64,

    /// Caller metadata recorded on the ledger entry and audit entry.
    #[serde(default)]
    pub metadata: Metadata,

    /// Idempotency key making the operation safe to retry end-to-end.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CreditRequest {
    /// A credit with empty metadata and no idempotency key.
    #[must_use]
    pub fn new(user_id: UserId, amount: i64) -> Self {
        Self {
            user_id,
            amount,
            metadata: Metadata::new(),
            idempotency_key: None,
        }
    }
}

/// A membership tier upgrade or downgrade.
///
/// The new balance is a replacement, not a delta: the user is set to the
/// target tier's configured credits cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierChangeRequest {
    /// The subject user.
    pub user_id: UserId,

    /// The tier to move to; must exist in the hierarchy.
    pub target_tier: String,

    /// What to do with the stored membership expiration. Defaults to
    /// preserving it unchanged.
    #[serde(default)]
    pub expires_at: ExpirationUpdate,

    /// Force the expiration to none regardless of `expires_at`. Honored
    /// by downgrades only.
    #[serde(default)]
    pub clear_expiration: bool,

    /// Caller metadata recorded on the ledger entry and audit entry.
    #[serde(default)]
    pub metadata: Metadata,

    /// Idempotency key making the change safe to retry end-to-end.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TierChangeRequest {
    /// A tier change preserving expiration, with empty metadata and no
    /// idempotency key.
    #[must_use]
    pub fn new(user_id: UserId, target_tier: impl Into<String>) -> Self {
        Self {
            user_id,
            target_tier: target_tier.into(),
            expires_at: ExpirationUpdate::Keep,
            clear_expiration: false,
            metadata: Metadata::new(),
            idempotency_key: None,
        }
    }
}

// =============================================================================
// Receipts
// =============================================================================

/// Outcome of a successful charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    /// Always true; failures are errors.
    pub success: bool,

    /// The cost deducted, after any tier override.
    pub cost: i64,

    /// Balance before the charge.
    pub balance_before: i64,

    /// Balance after the charge.
    pub balance_after: i64,

    /// The ledger entry recording the charge.
    pub transaction_id: TransactionId,
}

/// Outcome of a successful refund or grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditReceipt {
    /// Always true; failures are errors.
    pub success: bool,

    /// The credits added.
    pub amount: i64,

    /// Balance before the credit.
    pub balance_before: i64,

    /// Balance after the credit.
    pub balance_after: i64,

    /// The ledger entry recording the credit.
    pub transaction_id: TransactionId,
}

/// Outcome of a successful tier change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierChangeReceipt {
    /// Always true; failures are errors.
    pub success: bool,

    /// The user's effective tier before the change, if any.
    pub old_tier: Option<String>,

    /// The tier moved to.
    pub new_tier: String,

    /// Balance before the change.
    pub old_credits: i64,

    /// Balance after the change: the target tier's credits cap.
    pub new_credits: i64,

    /// `new_credits - old_credits`. May be negative on an upgrade from a
    /// high balance, or positive on a downgrade from a low one.
    pub credits_delta: i64,

    /// The ledger entry recording the change.
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TierDirection {
    Upgrade,
    Downgrade,
}

impl TierDirection {
    const fn action(self) -> &'static str {
        match self {
            Self::Upgrade => "tier-upgrade",
            Self::Downgrade => "tier-downgrade",
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The credit-ledger orchestration engine.
///
/// Constructed once from an immutable configuration and a storage handle;
/// construction fails synchronously on invalid configuration. All
/// operations take an optional transaction-context handle threaded
/// through every storage call unchanged.
#[derive(Debug)]
pub struct Engine<S: Storage> {
    storage: Arc<S>,
    config: EngineConfig,
    tiers: TierValidator,
    idempotency: IdempotencyCache<S>,
    retry: RetryExecutor,
    audit: AuditRecorder<S>,
}

impl<S: Storage> Engine<S> {
    /// Build an engine over a storage handle and configuration.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` when the membership section
    /// is inconsistent: a tier without a credits cap, or a negative cap.
    pub fn new(storage: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let tiers = TierValidator::new(config.membership.tiers.clone());
        let idempotency = IdempotencyCache::new(Arc::clone(&storage), config.idempotency.clone());
        let retry = RetryExecutor::new(config.retry.clone());
        let audit = AuditRecorder::new(Arc::clone(&storage), config.audit.clone());

        Ok(Self {
            storage,
            config,
            tiers,
            idempotency,
            retry,
            audit,
        })
    }

    /// The tier validator built from this engine's hierarchy.
    #[must_use]
    pub fn tiers(&self) -> &TierValidator {
        &self.tiers
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Charge a user for an action from the cost catalog.
    ///
    /// # Errors
    ///
    /// `UserNotFound`, `UndefinedAction`, `MembershipRequired`,
    /// `InsufficientCredits`, or a storage error once retries are
    /// exhausted.
    pub async fn charge(
        &self,
        request: ChargeRequest,
        txn: Option<&S::Txn>,
    ) -> Result<ChargeReceipt> {
        if let Some(outcome) = self
            .check_replay(request.idempotency_key.as_deref(), txn)
            .await?
        {
            return outcome.into_result();
        }

        let result = self.execute_charge(&request, txn).await;

        match &result {
            Ok(receipt) => {
                let metadata = merge(
                    &request.metadata,
                    [
                        ("cost", json!(receipt.cost)),
                        ("balanceBefore", json!(receipt.balance_before)),
                        ("balanceAfter", json!(receipt.balance_after)),
                        ("transactionId", json!(receipt.transaction_id)),
                    ],
                );
                self.audit
                    .record(
                        request.user_id,
                        &request.action,
                        AuditStatus::Success,
                        metadata,
                        None,
                        txn,
                    )
                    .await;
                tracing::info!(
                    user_id = %request.user_id,
                    action = %request.action,
                    cost = receipt.cost,
                    balance_after = receipt.balance_after,
                    transaction_id = %receipt.transaction_id,
                    "charge applied"
                );
            }
            Err(err) => {
                let metadata = merge(&request.metadata, [("action", json!(request.action))]);
                self.audit
                    .record(
                        request.user_id,
                        &request.action,
                        AuditStatus::Failed,
                        metadata,
                        Some(err.to_string()),
                        txn,
                    )
                    .await;
                tracing::warn!(
                    user_id = %request.user_id,
                    action = %request.action,
                    code = err.code(),
                    error = %err,
                    "charge failed"
                );
            }
        }

        self.store_outcome(request.idempotency_key.as_deref(), &result, txn)
            .await;
        result
    }

    /// Return credits to a user.
    ///
    /// # Errors
    ///
    /// `UserNotFound`, `InvalidAmount` for a negative amount, or a
    /// storage error once retries are exhausted.
    pub async fn refund(
        &self,
        request: CreditRequest,
        txn: Option<&S::Txn>,
    ) -> Result<CreditReceipt> {
        self.apply_credit("refund", request, txn).await
    }

    /// Grant promotional or administrative credits to a user.
    ///
    /// # Errors
    ///
    /// `UserNotFound`, `InvalidAmount` for a negative amount, or a
    /// storage error once retries are exhausted.
    pub async fn grant(
        &self,
        request: CreditRequest,
        txn: Option<&S::Txn>,
    ) -> Result<CreditReceipt> {
        self.apply_credit("grant", request, txn).await
    }

    /// Move a user to a strictly higher tier, setting the balance to the
    /// target tier's credits cap.
    ///
    /// # Errors
    ///
    /// `UserNotFound`, `UndefinedTier`, `InvalidTierChange`, or a storage
    /// error once retries are exhausted.
    pub async fn upgrade_tier(
        &self,
        request: TierChangeRequest,
        txn: Option<&S::Txn>,
    ) -> Result<TierChangeReceipt> {
        self.change_tier(TierDirection::Upgrade, request, txn).await
    }

    /// Move a user to a strictly lower tier, setting the balance to the
    /// target tier's credits cap.
    ///
    /// # Errors
    ///
    /// `UserNotFound`, `UndefinedTier`, `InvalidTierChange`, or a storage
    /// error once retries are exhausted.
    pub async fn downgrade_tier(
        &self,
        request: TierChangeRequest,
        txn: Option<&S::Txn>,
    ) -> Result<TierChangeReceipt> {
        self.change_tier(TierDirection::Downgrade, request, txn)
            .await
    }

    /// Read a user's current balance. Pure: no mutation, no ledger entry,
    /// no audit entry.
    ///
    /// # Errors
    ///
    /// `UserNotFound` when the user doesn't exist.
    pub async fn query_balance(&self, user_id: &UserId, txn: Option<&S::Txn>) -> Result<i64> {
        let user = self.load_user(user_id, txn).await?;
        Ok(user.credits)
    }

    /// List a user's ledger entries, newest-first, with combinable
    /// filters.
    ///
    /// # Errors
    ///
    /// `UserNotFound` when the user doesn't exist, or a storage error.
    pub async fn transactions(
        &self,
        user_id: &UserId,
        query: &TransactionQuery,
        txn: Option<&S::Txn>,
    ) -> Result<Vec<Transaction>> {
        self.load_user(user_id, txn).await?;
        Ok(self.storage.get_transactions(user_id, query, txn).await?)
    }

    // =========================================================================
    // Stage Helpers
    // =========================================================================

    async fn load_user(&self, user_id: &UserId, txn: Option<&S::Txn>) -> Result<User> {
        self.storage
            .get_user_by_id(user_id, txn)
            .await
            .map_err(LedgerError::from)?
            .ok_or(LedgerError::UserNotFound { user_id: *user_id })
    }

    async fn check_replay(
        &self,
        key: Option<&str>,
        txn: Option<&S::Txn>,
    ) -> Result<Option<StoredOutcome>> {
        let Some(key) = key else { return Ok(None) };
        let Some(record) = self.idempotency.check(key, txn).await? else {
            return Ok(None);
        };
        let outcome = serde_json::from_value(record.result).map_err(|e| {
            LedgerError::Serialization(format!("corrupt idempotency record \"{key}\": {e}"))
        })?;
        tracing::debug!(key, "idempotency cache hit, replaying stored outcome");
        Ok(Some(outcome))
    }

    /// Persist the final outcome under the idempotency key. Best-effort:
    /// a bookkeeping failure never masks the primary result.
    async fn store_outcome<T: Serialize>(
        &self,
        key: Option<&str>,
        result: &Result<T>,
        txn: Option<&S::Txn>,
    ) {
        let Some(key) = key else { return };
        let encoded = StoredOutcome::from_result(result).and_then(|outcome| {
            serde_json::to_value(&outcome).map_err(|e| LedgerError::Serialization(e.to_string()))
        });
        match encoded {
            Ok(value) => {
                if let Err(err) = self.idempotency.save(key, value, txn).await {
                    tracing::warn!(key, error = %err, "failed to save idempotency record");
                }
            }
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode idempotency record");
            }
        }
    }

    // =========================================================================
    // Operation Bodies (stages 2-4)
    // =========================================================================

    async fn execute_charge(
        &self,
        request: &ChargeRequest,
        txn: Option<&S::Txn>,
    ) -> Result<ChargeReceipt> {
        let user = self.load_user(&request.user_id, txn).await?;

        let effective_tier = self.tiers.effective_tier(&user);
        let cost = self
            .config
            .action_cost(&request.action, effective_tier)
            .ok_or_else(|| LedgerError::UndefinedAction {
                action: request.action.clone(),
            })?;

        if let Some(required) = self.config.membership.requirement(&request.action) {
            let check = self.tiers.validate(&user, Some(required));
            if !check.valid {
                return Err(LedgerError::MembershipRequired {
                    user_id: request.user_id,
                    required: required.to_string(),
                    current: check.current_tier,
                });
            }
        }

        if !user.has_sufficient_credits(cost) {
            return Err(LedgerError::InsufficientCredits {
                user_id: request.user_id,
                required: cost,
                available: user.credits,
            });
        }

        let balance_before = user.credits;
        let (updated, transaction) = self
            .retry
            .run(|| async move {
                let updated = self
                    .storage
                    .update_user_credits(&request.user_id, -cost, txn)
                    .await?;
                let entry = NewTransaction {
                    user_id: request.user_id,
                    action: request.action.clone(),
                    amount: -cost,
                    balance_before,
                    balance_after: updated.credits,
                    metadata: request.metadata.clone(),
                };
                let transaction = self.storage.create_transaction(entry, txn).await?;
                Ok((updated, transaction))
            })
            .await?;

        Ok(ChargeReceipt {
            success: true,
            cost,
            balance_before,
            balance_after: updated.credits,
            transaction_id: transaction.id,
        })
    }

    async fn apply_credit(
        &self,
        action: &str,
        request: CreditRequest,
        txn: Option<&S::Txn>,
    ) -> Result<CreditReceipt> {
        if let Some(outcome) = self
            .check_replay(request.idempotency_key.as_deref(), txn)
            .await?
        {
            return outcome.into_result();
        }

        let result = self.execute_credit(action, &request, txn).await;

        match &result {
            Ok(receipt) => {
                let metadata = merge(
                    &request.metadata,
                    [
                        ("amount", json!(receipt.amount)),
                        ("balanceBefore", json!(receipt.balance_before)),
                        ("balanceAfter", json!(receipt.balance_after)),
                        ("transactionId", json!(receipt.transaction_id)),
                    ],
                );
                self.audit
                    .record(
                        request.user_id,
                        action,
                        AuditStatus::Success,
                        metadata,
                        None,
                        txn,
                    )
                    .await;
                tracing::info!(
                    user_id = %request.user_id,
                    action,
                    amount = receipt.amount,
                    balance_after = receipt.balance_after,
                    transaction_id = %receipt.transaction_id,
                    "credits added"
                );
            }
            Err(err) => {
                let metadata = merge(&request.metadata, [("amount", json!(request.amount))]);
                self.audit
                    .record(
                        request.user_id,
                        action,
                        AuditStatus::Failed,
                        metadata,
                        Some(err.to_string()),
                        txn,
                    )
                    .await;
                tracing::warn!(
                    user_id = %request.user_id,
                    action,
                    code = err.code(),
                    error = %err,
                    "credit failed"
                );
            }
        }

        self.store_outcome(request.idempotency_key.as_deref(), &result, txn)
            .await;
        result
    }

    async fn execute_credit(
        &self,
        action: &str,
        request: &CreditRequest,
        txn: Option<&S::Txn>,
    ) -> Result<CreditReceipt> {
        let user = self.load_user(&request.user_id, txn).await?;

        if request.amount < 0 {
            return Err(LedgerError::InvalidAmount {
                amount: request.amount,
            });
        }

        let amount = request.amount;
        let balance_before = user.credits;
        let (updated, transaction) = self
            .retry
            .run(|| async move {
                let updated = self
                    .storage
                    .update_user_credits(&request.user_id, amount, txn)
                    .await?;
                let entry = NewTransaction {
                    user_id: request.user_id,
                    action: action.to_string(),
                    amount,
                    balance_before,
                    balance_after: updated.credits,
                    metadata: request.metadata.clone(),
                };
                let transaction = self.storage.create_transaction(entry, txn).await?;
                Ok((updated, transaction))
            })
            .await?;

        Ok(CreditReceipt {
            success: true,
            amount,
            balance_before,
            balance_after: updated.credits,
            transaction_id: transaction.id,
        })
    }

    async fn change_tier(
        &self,
        direction: TierDirection,
        request: TierChangeRequest,
        txn: Option<&S::Txn>,
    ) -> Result<TierChangeReceipt> {
        if let Some(outcome) = self
            .check_replay(request.idempotency_key.as_deref(), txn)
            .await?
        {
            return outcome.into_result();
        }

        let result = self.execute_tier_change(direction, &request, txn).await;

        match &result {
            Ok(receipt) => {
                let metadata = merge(
                    &request.metadata,
                    [
                        ("oldTier", json!(receipt.old_tier)),
                        ("newTier", json!(receipt.new_tier)),
                        ("oldCredits", json!(receipt.old_credits)),
                        ("newCredits", json!(receipt.new_credits)),
                        ("creditsDelta", json!(receipt.credits_delta)),
                        ("transactionId", json!(receipt.transaction_id)),
                    ],
                );
                self.audit
                    .record(
                        request.user_id,
                        direction.action(),
                        AuditStatus::Success,
                        metadata,
                        None,
                        txn,
                    )
                    .await;
                tracing::info!(
                    user_id = %request.user_id,
                    action = direction.action(),
                    old_tier = ?receipt.old_tier,
                    new_tier = %receipt.new_tier,
                    credits_delta = receipt.credits_delta,
                    transaction_id = %receipt.transaction_id,
                    "membership tier changed"
                );
            }
            Err(err) => {
                let metadata = merge(
                    &request.metadata,
                    [("targetTier", json!(request.target_tier))],
                );
                self.audit
                    .record(
                        request.user_id,
                        direction.action(),
                        AuditStatus::Failed,
                        metadata,
                        Some(err.to_string()),
                        txn,
                    )
                    .await;
                tracing::warn!(
                    user_id = %request.user_id,
                    action = direction.action(),
                    target_tier = %request.target_tier,
                    code = err.code(),
                    error = %err,
                    "tier change failed"
                );
            }
        }

        self.store_outcome(request.idempotency_key.as_deref(), &result, txn)
            .await;
        result
    }

    async fn execute_tier_change(
        &self,
        direction: TierDirection,
        request: &TierChangeRequest,
        txn: Option<&S::Txn>,
    ) -> Result<TierChangeReceipt> {
        let user = self.load_user(&request.user_id, txn).await?;

        let target_level =
            self.tiers
                .level(&request.target_tier)
                .ok_or_else(|| LedgerError::UndefinedTier {
                    tier: request.target_tier.clone(),
                })?;

        // An expired membership counts as no tier at all.
        let current_tier = self.tiers.effective_tier(&user).map(String::from);
        let current_level = match &current_tier {
            Some(tier) => Some(self.tiers.level(tier).ok_or_else(|| {
                LedgerError::UndefinedTier { tier: tier.clone() }
            })?),
            None => None,
        };

        match direction {
            TierDirection::Upgrade => {
                if !current_level.map_or(true, |level| target_level > level) {
                    return Err(LedgerError::InvalidTierChange {
                        current: current_tier,
                        target: request.target_tier.clone(),
                        reason: "target level must be strictly greater than the current level"
                            .to_string(),
                    });
                }
            }
            TierDirection::Downgrade => {
                let Some(level) = current_level else {
                    return Err(LedgerError::InvalidTierChange {
                        current: current_tier,
                        target: request.target_tier.clone(),
                        reason: "no active membership tier to downgrade from".to_string(),
                    });
                };
                if target_level >= level {
                    return Err(LedgerError::InvalidTierChange {
                        current: current_tier,
                        target: request.target_tier.clone(),
                        reason: "target level must be strictly lower than the current level"
                            .to_string(),
                    });
                }
            }
        }

        let cap = self
            .config
            .membership
            .cap(&request.target_tier)
            .ok_or_else(|| {
                // Unreachable after construction-time validation.
                LedgerError::Configuration(format!(
                    "membership tier \"{}\" has no credits cap configured",
                    request.target_tier
                ))
            })?;

        let old_credits = user.credits;
        let credits_delta = cap - old_credits;
        let expiration = if direction == TierDirection::Downgrade && request.clear_expiration {
            ExpirationUpdate::Clear
        } else {
            request.expires_at
        };

        let tx_metadata = merge(
            &request.metadata,
            [
                ("oldTier", json!(current_tier)),
                ("newTier", json!(request.target_tier)),
            ],
        );
        let tx_metadata = &tx_metadata;

        let (updated, transaction) = self
            .retry
            .run(|| async move {
                let updated = self
                    .storage
                    .update_user_membership(
                        &request.user_id,
                        &request.target_tier,
                        cap,
                        expiration,
                        txn,
                    )
                    .await?;
                let entry = NewTransaction {
                    user_id: request.user_id,
                    action: direction.action().to_string(),
                    amount: credits_delta,
                    balance_before: old_credits,
                    balance_after: cap,
                    metadata: tx_metadata.clone(),
                };
                let transaction = self.storage.create_transaction(entry, txn).await?;
                Ok((updated, transaction))
            })
            .await?;

        Ok(TierChangeReceipt {
            success: true,
            old_tier: current_tier,
            new_tier: request.target_tier.clone(),
            old_credits,
            new_credits: updated.credits,
            credits_delta,
            transaction_id: transaction.id,
        })
    }
}

/// Caller metadata merged with operation-derived fields; derived fields
/// win on key collisions.
fn merge<const N: usize>(
    caller: &Metadata,
    derived: [(&str, serde_json::Value); N],
) -> Metadata {
    let mut metadata = caller.clone();
    for (key, value) in derived {
        metadata.insert(key.to_string(), value);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_lets_derived_fields_win() {
        let mut caller = Metadata::new();
        caller.insert("source".to_string(), json!("api"));
        caller.insert("cost".to_string(), json!("spoofed"));

        let merged = merge(&caller, [("cost", json!(10))]);
        assert_eq!(merged["source"], json!("api"));
        assert_eq!(merged["cost"], json!(10));
    }

    #[test]
    fn tier_direction_actions() {
        assert_eq!(TierDirection::Upgrade.action(), "tier-upgrade");
        assert_eq!(TierDirection::Downgrade.action(), "tier-downgrade");
    }
}
