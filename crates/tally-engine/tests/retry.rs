//! Retry behavior against injected storage faults.

mod common;

use common::{test_config, TestHarness};
use tally_core::{AuditStatus, LedgerError};
use tally_engine::ChargeRequest;

#[tokio::test(start_paused = true)]
async fn transient_faults_within_the_budget_are_absorbed() {
    let h = TestHarness::new();
    let user = h.seed_user(100);

    // Two faults against a three-attempt budget.
    h.storage.fail_writes(2);
    let receipt = h
        .engine
        .charge(ChargeRequest::new(user.id, "api-call"), None)
        .await
        .unwrap();

    assert_eq!(receipt.balance_after, 90);
    assert_eq!(h.reload(&user).await.credits, 90);
    assert_eq!(h.storage.transaction_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_surface_the_storage_error() {
    let h = TestHarness::new();
    let user = h.seed_user(100);

    h.storage.fail_writes(3);
    let err = h
        .engine
        .charge(ChargeRequest::new(user.id, "api-call"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Storage(_)));
    assert_eq!(h.reload(&user).await.credits, 100);
    assert_eq!(h.storage.transaction_count(), 0);

    // The faults were consumed by the three attempts, so the failure
    // still got audited.
    let logs = h.storage.audit_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, AuditStatus::Failed);
}

#[tokio::test]
async fn disabled_retry_fails_on_the_first_fault() {
    let mut config = test_config();
    config.retry.enabled = false;
    let h = TestHarness::with_config(config);
    let user = h.seed_user(100);

    h.storage.fail_writes(1);
    let err = h
        .engine
        .charge(ChargeRequest::new(user.id, "api-call"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Storage(_)));
    assert_eq!(h.reload(&user).await.credits, 100);
}

#[tokio::test(start_paused = true)]
async fn storage_failure_after_retries_is_cached_under_the_key() {
    let h = TestHarness::new();
    let user = h.seed_user(100);

    let mut request = ChargeRequest::new(user.id, "api-call");
    request.idempotency_key = Some("op-1".to_string());

    h.storage.fail_writes(3);
    let first = h.engine.charge(request.clone(), None).await.unwrap_err();
    assert!(matches!(first, LedgerError::Storage(_)));

    // Storage is healthy again, but the cached failure replays.
    let second = h.engine.charge(request, None).await.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(h.reload(&user).await.credits, 100);
}
