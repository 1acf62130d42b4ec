//! Sole writer of `credit_ledger`. Every entry point here runs inside the
//! caller's transaction, locks the user row first, and recomputes
//! `balance_after` from that locked read so the running balance is
//! monotonic within the transaction (SPEC_FULL §4.B rule 1).

use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::common::error::AppError;
use crate::store::{ledger as ledger_store, users as users_store};

pub struct TopupOutcome {
    pub applied: bool,
    pub balance_after: i64,
}

pub struct AdjustOutcome {
    pub applied: bool,
    pub amount: i64,
    pub balance_after: i64,
}

pub enum ReleaseReason {
    Success,
    Fail,
}

impl ReleaseReason {
    fn key_suffix(&self) -> &'static str {
        match self {
            ReleaseReason::Success => "release_on_success",
            ReleaseReason::Fail => "release_on_fail",
        }
    }
}

async fn lock_user(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> Result<(), AppError> {
    users_store::lock_for_update(tx, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user".into()))?;
    Ok(())
}

/// At-most-once by unique `idempotency_key`; on conflict the call is a no-op
/// and reports `applied=false` without raising an error.
pub async fn apply_topup(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    credits: i64,
    source_type: &str,
    source_id: &str,
    idempotency_key: &str,
) -> Result<TopupOutcome, AppError> {
    lock_user(tx, user_id).await?;
    let current = ledger_store::balance(tx, user_id).await?;
    let balance_after = current + credits;

    let entry = ledger_store::insert_entry(
        tx,
        user_id,
        "topup",
        credits,
        balance_after,
        source_type,
        source_id,
        idempotency_key,
        json!({}),
    )
    .await?;

    Ok(match entry {
        Some(_) => TopupOutcome { applied: true, balance_after },
        None => TopupOutcome { applied: false, balance_after: current },
    })
}

/// Locks the user row, checks `balance >= credits_cost`, and inserts a
/// negative hold entry keyed `job:{job_id}:hold`.
pub async fn place_hold(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    job_id: Uuid,
    credits_cost: i64,
) -> Result<i64, AppError> {
    lock_user(tx, user_id).await?;
    let current = ledger_store::balance(tx, user_id).await?;
    if current < credits_cost {
        return Err(AppError::InsufficientCredits);
    }
    let balance_after = current - credits_cost;

    ledger_store::insert_entry(
        tx,
        user_id,
        "hold",
        -credits_cost,
        balance_after,
        "job",
        &job_id.to_string(),
        &format!("job:{job_id}:hold"),
        json!({}),
    )
    .await?;

    Ok(balance_after)
}

/// Idempotent via `job:{job_id}:{reason}`; inserts a positive release entry
/// of exactly `credits_cost`.
pub async fn release_hold(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    job_id: Uuid,
    credits_cost: i64,
    reason: ReleaseReason,
) -> Result<(), AppError> {
    lock_user(tx, user_id).await?;
    let current = ledger_store::balance(tx, user_id).await?;
    let balance_after = current + credits_cost;

    ledger_store::insert_entry(
        tx,
        user_id,
        "release",
        credits_cost,
        balance_after,
        "job",
        &job_id.to_string(),
        &format!("job:{job_id}:{}", reason.key_suffix()),
        json!({}),
    )
    .await?;

    Ok(())
}

/// Idempotent via `job:{job_id}:consume`; inserts a negative consume entry
/// of exactly `credits_cost`.
pub async fn consume_for_job(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    job_id: Uuid,
    credits_cost: i64,
) -> Result<(), AppError> {
    lock_user(tx, user_id).await?;
    let current = ledger_store::balance(tx, user_id).await?;
    let balance_after = current - credits_cost;

    ledger_store::insert_entry(
        tx,
        user_id,
        "consume",
        -credits_cost,
        balance_after,
        "job",
        &job_id.to_string(),
        &format!("job:{job_id}:consume"),
        json!({}),
    )
    .await?;

    Ok(())
}

/// Admin path; same idempotency semantics as the other entry points. No
/// rebalancing pass for out-of-order entries: strictly append-only, and
/// `balance_after` reflects order of arrival, never recomputed
/// retroactively (decided open question, see DESIGN.md).
pub async fn adjust(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    delta: i64,
    reason: &str,
    idempotency_key: &str,
) -> Result<AdjustOutcome, AppError> {
    if delta == 0 {
        return Err(AppError::Validation("adjustment amount must be non-zero".into()));
    }
    lock_user(tx, user_id).await?;
    let current = ledger_store::balance(tx, user_id).await?;
    let balance_after = current + delta;

    let entry = ledger_store::insert_entry(
        tx,
        user_id,
        "adjustment",
        delta,
        balance_after,
        "admin",
        idempotency_key,
        idempotency_key,
        json!({ "reason": reason }),
    )
    .await?;

    Ok(match entry {
        Some(_) => AdjustOutcome { applied: true, amount: delta, balance_after },
        None => AdjustOutcome { applied: false, amount: delta, balance_after: current },
    })
}
