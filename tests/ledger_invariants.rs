//! Balance and idempotency invariants for the credit ledger, independent of
//! the HTTP and worker layers that drive it.

mod common;

use common::{create_test_user, ledger_balance, TestHarness};
use creditworks_core::common::error::AppError;
use creditworks_core::ledger::{self, ReleaseReason};
use creditworks_core::store::ledger as ledger_store;
use test_context::test_context;
use uuid::Uuid;

#[test_context(TestHarness)]
#[tokio::test]
async fn balance_equals_sum_of_entries_and_running_balance_after(ctx: &TestHarness) {
    let user_id = create_test_user(&ctx.db, "invariant-balance@example.com", "StrongPass123").await.unwrap();
    let job_id = Uuid::new_v4();

    let mut tx = ctx.db.begin().await.unwrap();
    ledger::apply_topup(&mut tx, user_id, 20, "test", "src-1", "invariant-balance:topup").await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = ctx.db.begin().await.unwrap();
    ledger::place_hold(&mut tx, user_id, job_id, 5).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = ctx.db.begin().await.unwrap();
    ledger::release_hold(&mut tx, user_id, job_id, 5, ReleaseReason::Success).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = ctx.db.begin().await.unwrap();
    ledger::consume_for_job(&mut tx, user_id, job_id, 5).await.unwrap();
    tx.commit().await.unwrap();

    let mut entries = ledger_store::list_for_user(&ctx.db, user_id, 100).await.unwrap();
    let balance = ledger_balance(&ctx.db, user_id).await.unwrap();
    let sum: i64 = entries.iter().map(|e| e.amount_signed).sum();
    assert_eq!(balance, sum);
    assert_eq!(balance, 15);

    entries.sort_by_key(|e| e.created_at);
    let mut running = 0i64;
    for entry in &entries {
        running += entry.amount_signed;
        assert_eq!(entry.balance_after, running, "balance_after must match the running sum up to that entry");
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn topup_is_idempotent_under_the_same_key(ctx: &TestHarness) {
    let user_id = create_test_user(&ctx.db, "invariant-topup-idem@example.com", "StrongPass123").await.unwrap();

    for _ in 0..2 {
        let mut tx = ctx.db.begin().await.unwrap();
        ledger::apply_topup(&mut tx, user_id, 20, "stripe_checkout", "evt_1", "stripe:evt_1:topup").await.unwrap();
        tx.commit().await.unwrap();
    }

    let entries = ledger_store::list_for_user(&ctx.db, user_id, 100).await.unwrap();
    assert_eq!(entries.iter().filter(|e| e.idempotency_key == "stripe:evt_1:topup").count(), 1);
    assert_eq!(ledger_balance(&ctx.db, user_id).await.unwrap(), 20);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn hold_fails_with_insufficient_credits_and_writes_no_entry(ctx: &TestHarness) {
    let user_id = create_test_user(&ctx.db, "invariant-insufficient@example.com", "StrongPass123").await.unwrap();

    let mut tx = ctx.db.begin().await.unwrap();
    let result = ledger::place_hold(&mut tx, user_id, Uuid::new_v4(), 10).await;
    assert!(matches!(result, Err(AppError::InsufficientCredits)));
    drop(tx);

    let entries = ledger_store::list_for_user(&ctx.db, user_id, 100).await.unwrap();
    assert!(entries.is_empty());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn adjustment_rejects_a_zero_delta(ctx: &TestHarness) {
    let user_id = create_test_user(&ctx.db, "invariant-adjust-zero@example.com", "StrongPass123").await.unwrap();
    let mut tx = ctx.db.begin().await.unwrap();
    assert!(ledger::adjust(&mut tx, user_id, 0, "test", "adjust:zero").await.is_err());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn adjustment_is_idempotent_under_the_same_key(ctx: &TestHarness) {
    let user_id = create_test_user(&ctx.db, "invariant-adjust-idem@example.com", "StrongPass123").await.unwrap();

    let mut tx = ctx.db.begin().await.unwrap();
    let first = ledger::adjust(&mut tx, user_id, 50, "promo credit", "adjust:promo-1").await.unwrap();
    tx.commit().await.unwrap();
    assert!(first.applied);

    let mut tx = ctx.db.begin().await.unwrap();
    let second = ledger::adjust(&mut tx, user_id, 50, "promo credit", "adjust:promo-1").await.unwrap();
    tx.commit().await.unwrap();
    assert!(!second.applied);

    assert_eq!(ledger_balance(&ctx.db, user_id).await.unwrap(), 50);
}
