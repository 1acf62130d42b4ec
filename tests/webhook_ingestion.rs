//! Stripe-style webhook signature verification, dedupe, and the credit
//! top-up it drives.

mod common;

use chrono::Utc;
use common::{create_test_user, ledger_balance, TestHarness};
use creditworks_core::store::ledger as ledger_store;
use creditworks_core::webhook::{self, IngestOutcome};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use test_context::test_context;

const SECRET: &str = "whsec_test";

fn sign(timestamp: i64, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(body);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[test_context(TestHarness)]
#[tokio::test]
async fn checkout_completed_tops_up_credits_and_replay_is_deduped(ctx: &TestHarness) {
    let user_id = create_test_user(&ctx.db, "webhook-topup@example.com", "StrongPass123").await.unwrap();

    let body = json!({
        "id": "evt_topup_1",
        "type": "checkout.session.completed",
        "data": { "object": { "metadata": { "user_id": user_id, "credits": 20 } } }
    })
    .to_string();
    let header = sign(Utc::now().timestamp(), body.as_bytes());

    let first = webhook::ingest(&ctx.db, SECRET, &header, body.as_bytes()).await.unwrap();
    assert_eq!(first.outcome, IngestOutcome::Processed);
    assert_eq!(first.event_id, "evt_topup_1");
    assert_eq!(first.event_type, "checkout.session.completed");

    let second = webhook::ingest(&ctx.db, SECRET, &header, body.as_bytes()).await.unwrap();
    assert_eq!(second.outcome, IngestOutcome::Duplicate);

    assert_eq!(ledger_balance(&ctx.db, user_id).await.unwrap(), 20);

    let key = "stripe:evt_topup_1:topup".to_string();
    assert!(ledger_store::find_by_idempotency_key(&ctx.db, &key).await.unwrap().is_some());

    let entries = ledger_store::list_for_user(&ctx.db, user_id, 100).await.unwrap();
    assert_eq!(entries.iter().filter(|e| e.idempotency_key == key).count(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn unrecognized_event_type_is_ignored(ctx: &TestHarness) {
    let body = json!({
        "id": "evt_ignored_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "metadata": {} } }
    })
    .to_string();
    let header = sign(Utc::now().timestamp(), body.as_bytes());

    let result = webhook::ingest(&ctx.db, SECRET, &header, body.as_bytes()).await.unwrap();
    assert_eq!(result.outcome, IngestOutcome::Ignored);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn missing_metadata_is_recorded_as_failed(ctx: &TestHarness) {
    let body = json!({
        "id": "evt_failed_1",
        "type": "checkout.session.completed",
        "data": { "object": { "metadata": {} } }
    })
    .to_string();
    let header = sign(Utc::now().timestamp(), body.as_bytes());

    let result = webhook::ingest(&ctx.db, SECRET, &header, body.as_bytes()).await.unwrap();
    assert_eq!(result.outcome, IngestOutcome::Failed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn stale_timestamp_is_rejected(ctx: &TestHarness) {
    let body = json!({
        "id": "evt_stale_1",
        "type": "checkout.session.completed",
        "data": { "object": { "metadata": {} } }
    })
    .to_string();
    let header = sign(Utc::now().timestamp() - 1000, body.as_bytes());

    assert!(webhook::ingest(&ctx.db, SECRET, &header, body.as_bytes()).await.is_err());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn wrong_signature_is_rejected(ctx: &TestHarness) {
    let body = json!({
        "id": "evt_wrong_sig",
        "type": "checkout.session.completed",
        "data": { "object": { "metadata": {} } }
    })
    .to_string();

    assert!(webhook::ingest(&ctx.db, SECRET, "t=0,v1=deadbeef", body.as_bytes()).await.is_err());
}
