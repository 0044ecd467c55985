//! In-memory storage backend.
//!
//! The reference implementation of the [`Storage`] contract: plain tables
//! behind an `RwLock`, no transactions (`Txn = ()`). Used as the test
//! double throughout the workspace and as a template for real backends.
//!
//! Includes a fault-injection hook ([`MemoryStorage::fail_writes`]) so
//! retry behavior can be exercised without a genuinely flaky backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use tally_core::{
    AuditLog, AuditLogId, ExpirationUpdate, IdempotencyRecord, NewAuditLog, NewTransaction,
    Transaction, TransactionId, TransactionQuery, User, UserId,
};

use crate::error::{Result, StoreError};
use crate::Storage;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    transactions: Vec<Transaction>,
    audit_logs: Vec<AuditLog>,
    idempotency: HashMap<String, IdempotencyRecord>,
}

/// In-memory storage implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
    fail_writes: AtomicU32,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user record.
    ///
    /// Seeding helper for tests and bootstrap code; user creation is not
    /// part of the engine-facing contract.
    pub fn put_user(&self, user: User) {
        if let Ok(mut tables) = self.tables.write() {
            tables.users.insert(user.id, user);
        }
    }

    /// Make the next `n` write calls fail with a backend error.
    ///
    /// Reads are unaffected. Each failing call consumes one unit.
    pub fn fail_writes(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Snapshot of all audit log entries, oldest first.
    #[must_use]
    pub fn audit_logs(&self) -> Vec<AuditLog> {
        self.tables
            .read()
            .map(|tables| tables.audit_logs.clone())
            .unwrap_or_default()
    }

    /// Snapshot of all transaction ledger entries, oldest first.
    #[must_use]
    pub fn transactions(&self) -> Vec<Transaction> {
        self.tables
            .read()
            .map(|tables| tables.transactions.clone())
            .unwrap_or_default()
    }

    /// Number of transaction ledger entries.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.tables
            .read()
            .map(|tables| tables.transactions.len())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".into()))
    }

    fn take_fault(&self) -> Result<()> {
        let armed = self
            .fail_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Txn = ();

    async fn get_user_by_id(
        &self,
        id: &UserId,
        _txn: Option<&Self::Txn>,
    ) -> Result<Option<User>> {
        Ok(self.read()?.users.get(id).cloned())
    }

    async fn update_user_credits(
        &self,
        id: &UserId,
        delta: i64,
        _txn: Option<&Self::Txn>,
    ) -> Result<User> {
        self.take_fault()?;
        let mut tables = self.write()?;
        let user = tables
            .users
            .get_mut(id)
            .ok_or(StoreError::NotFound { user_id: *id })?;

        user.credits += delta;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn update_user_membership(
        &self,
        id: &UserId,
        tier: &str,
        credits: i64,
        expires_at: ExpirationUpdate,
        _txn: Option<&Self::Txn>,
    ) -> Result<User> {
        self.take_fault()?;
        let mut tables = self.write()?;
        let user = tables
            .users
            .get_mut(id)
            .ok_or(StoreError::NotFound { user_id: *id })?;

        user.membership_tier = Some(tier.to_string());
        user.credits = credits;
        user.membership_expires_at = expires_at.apply(user.membership_expires_at);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn create_transaction(
        &self,
        entry: NewTransaction,
        _txn: Option<&Self::Txn>,
    ) -> Result<Transaction> {
        self.take_fault()?;
        let transaction = Transaction {
            id: TransactionId::generate(),
            user_id: entry.user_id,
            action: entry.action,
            amount: entry.amount,
            balance_before: entry.balance_before,
            balance_after: entry.balance_after,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };
        self.write()?.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn get_transactions(
        &self,
        user_id: &UserId,
        query: &TransactionQuery,
        _txn: Option<&Self::Txn>,
    ) -> Result<Vec<Transaction>> {
        let tables = self.read()?;
        // Insertion order is chronological; reverse for newest-first.
        let matches = tables
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == *user_id)
            .filter(|tx| query.action.as_deref().map_or(true, |a| a == tx.action))
            .filter(|tx| query.start_date.map_or(true, |at| tx.created_at >= at))
            .filter(|tx| query.end_date.map_or(true, |at| tx.created_at <= at))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn create_audit_log(
        &self,
        entry: NewAuditLog,
        _txn: Option<&Self::Txn>,
    ) -> Result<AuditLog> {
        self.take_fault()?;
        let log = AuditLog {
            id: AuditLogId::generate(),
            user_id: entry.user_id,
            action: entry.action,
            status: entry.status,
            metadata: entry.metadata,
            error_message: entry.error_message,
            created_at: Utc::now(),
        };
        self.write()?.audit_logs.push(log.clone());
        Ok(log)
    }

    async fn get_idempotency_record(
        &self,
        key: &str,
        _txn: Option<&Self::Txn>,
    ) -> Result<Option<IdempotencyRecord>> {
        let mut tables = self.write()?;
        match tables.idempotency.get(key) {
            Some(record) if record.is_expired() => {
                // Expired records are absent; purge on lookup.
                tables.idempotency.remove(key);
                Ok(None)
            }
            Some(record) => Ok(Some(record.clone())),
            None => Ok(None),
        }
    }

    async fn create_idempotency_record(
        &self,
        record: IdempotencyRecord,
        _txn: Option<&Self::Txn>,
    ) -> Result<IdempotencyRecord> {
        self.take_fault()?;
        self.write()?
            .idempotency
            .insert(record.key.clone(), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tally_core::Metadata;

    fn seed(storage: &MemoryStorage, credits: i64) -> UserId {
        let mut user = User::new(UserId::generate());
        user.credits = credits;
        let id = user.id;
        storage.put_user(user);
        id
    }

    fn entry(user_id: UserId, action: &str, amount: i64, before: i64) -> NewTransaction {
        NewTransaction {
            user_id,
            action: action.to_string(),
            amount,
            balance_before: before,
            balance_after: before + amount,
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn user_load_and_credit_update() {
        let storage = MemoryStorage::new();
        let id = seed(&storage, 500);

        let loaded = storage.get_user_by_id(&id, None).await.unwrap().unwrap();
        assert_eq!(loaded.credits, 500);

        let updated = storage.update_user_credits(&id, -100, None).await.unwrap();
        assert_eq!(updated.credits, 400);

        let missing = UserId::generate();
        let err = storage
            .update_user_credits(&missing, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound { user_id: missing });
    }

    #[tokio::test]
    async fn membership_update_replaces_balance() {
        let storage = MemoryStorage::new();
        let id = seed(&storage, 8000);

        let updated = storage
            .update_user_membership(&id, "pro", 2000, ExpirationUpdate::Keep, None)
            .await
            .unwrap();
        assert_eq!(updated.membership_tier.as_deref(), Some("pro"));
        assert_eq!(updated.credits, 2000);
    }

    #[tokio::test]
    async fn membership_expiration_keep_clear_set() {
        let storage = MemoryStorage::new();
        let id = seed(&storage, 0);
        let at = Utc::now() + Duration::days(30);

        let user = storage
            .update_user_membership(&id, "basic", 500, ExpirationUpdate::Set(at), None)
            .await
            .unwrap();
        assert_eq!(user.membership_expires_at, Some(at));

        let user = storage
            .update_user_membership(&id, "pro", 2000, ExpirationUpdate::Keep, None)
            .await
            .unwrap();
        assert_eq!(user.membership_expires_at, Some(at));

        let user = storage
            .update_user_membership(&id, "basic", 500, ExpirationUpdate::Clear, None)
            .await
            .unwrap();
        assert_eq!(user.membership_expires_at, None);
    }

    #[tokio::test]
    async fn transactions_list_newest_first_with_filters() {
        let storage = MemoryStorage::new();
        let id = seed(&storage, 0);

        for (action, amount) in [("charge-a", -10), ("grant", 50), ("charge-a", -5)] {
            storage
                .create_transaction(entry(id, action, amount, 0), None)
                .await
                .unwrap();
        }

        let all = storage
            .get_transactions(&id, &TransactionQuery::default(), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].amount, -5); // newest first
        assert_eq!(all[2].amount, -10);

        let charges = storage
            .get_transactions(
                &id,
                &TransactionQuery {
                    action: Some("charge-a".into()),
                    ..TransactionQuery::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(charges.len(), 2);

        let paged = storage
            .get_transactions(
                &id,
                &TransactionQuery {
                    limit: Some(1),
                    offset: Some(1),
                    ..TransactionQuery::default()
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].amount, 50);
    }

    #[tokio::test]
    async fn transactions_date_filters_combine() {
        let storage = MemoryStorage::new();
        let id = seed(&storage, 0);
        storage
            .create_transaction(entry(id, "grant", 10, 0), None)
            .await
            .unwrap();

        let future_only = TransactionQuery {
            start_date: Some(Utc::now() + Duration::hours(1)),
            ..TransactionQuery::default()
        };
        let matches = storage.get_transactions(&id, &future_only, None).await.unwrap();
        assert!(matches.is_empty());

        let window = TransactionQuery {
            start_date: Some(Utc::now() - Duration::hours(1)),
            end_date: Some(Utc::now() + Duration::hours(1)),
            action: Some("grant".into()),
            ..TransactionQuery::default()
        };
        let matches = storage.get_transactions(&id, &window, None).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn idempotency_record_overwrite_and_purge() {
        let storage = MemoryStorage::new();

        let first = IdempotencyRecord::new("op-1".into(), serde_json::json!({"v": 1}), 60);
        storage.create_idempotency_record(first, None).await.unwrap();

        let second = IdempotencyRecord::new("op-1".into(), serde_json::json!({"v": 2}), 60);
        storage.create_idempotency_record(second, None).await.unwrap();

        let found = storage
            .get_idempotency_record("op-1", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.result, serde_json::json!({"v": 2}));

        // Zero TTL expires immediately; the lookup purges it.
        let expired = IdempotencyRecord::new("op-2".into(), serde_json::Value::Null, 0);
        storage.create_idempotency_record(expired, None).await.unwrap();
        assert!(storage
            .get_idempotency_record("op-2", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn injected_faults_hit_writes_not_reads() {
        let storage = MemoryStorage::new();
        let id = seed(&storage, 100);

        storage.fail_writes(2);

        // Reads pass through.
        assert!(storage.get_user_by_id(&id, None).await.is_ok());

        // The next two writes fail, the third succeeds.
        assert!(matches!(
            storage.update_user_credits(&id, -1, None).await,
            Err(StoreError::Backend(_))
        ));
        assert!(matches!(
            storage.update_user_credits(&id, -1, None).await,
            Err(StoreError::Backend(_))
        ));
        let user = storage.update_user_credits(&id, -1, None).await.unwrap();
        assert_eq!(user.credits, 99);
    }
}
