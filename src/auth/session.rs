use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::store::sessions;

/// 48 random bytes, base64url-encoded. The raw token is handed to the
/// client; only its SHA-256 hash is ever written to the database, so a
/// database leak does not hand out live sessions.
pub struct IssuedSession {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub async fn issue(
    pool: &PgPool,
    user_id: Uuid,
    session_days: i64,
) -> Result<IssuedSession, sqlx::Error> {
    let mut raw = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = URL_SAFE_NO_PAD.encode(raw);

    let expires_at = Utc::now() + Duration::days(session_days);
    sessions::insert(pool, user_id, &hash_token(&token), expires_at).await?;

    Ok(IssuedSession { token, expires_at })
}

/// Looks up the session by the hash of the presented token and, if valid,
/// touches `last_used_at`. Returns the owning user id.
pub async fn authenticate(pool: &PgPool, token: &str) -> Result<Option<Uuid>, sqlx::Error> {
    let session = sessions::find_by_token_hash(pool, &hash_token(token)).await?;
    let Some(session) = session else {
        return Ok(None);
    };
    if !session.is_valid(Utc::now()) {
        return Ok(None);
    }
    sessions::touch_last_used(pool, session.id).await?;
    Ok(Some(session.user_id))
}

pub async fn revoke_all(pool: &PgPool, user_id: Uuid) -> Result<u64, sqlx::Error> {
    sessions::revoke_all_for_user(pool, user_id).await
}

/// Revokes only the session matching the presented token. Returns how many
/// rows were revoked (0 or 1).
pub async fn revoke(pool: &PgPool, token: &str) -> Result<u64, sqlx::Error> {
    sessions::revoke_by_token_hash(pool, &hash_token(token)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_token_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
