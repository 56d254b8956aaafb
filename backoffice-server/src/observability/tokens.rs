//! One-time action tokens

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use redb::WriteTransaction;
use shared::models::ActionToken;

use super::{ReplayError, ReplayResult};
use crate::db::tables::ACTION_TOKENS;
use crate::db::{get_doc, put_doc};

/// 256 bits of randomness, hex encoded
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn mint(
    txn: &WriteTransaction,
    error_id: &str,
    user_id: &str,
    ttl_seconds: u64,
    now: DateTime<Utc>,
) -> ReplayResult<ActionToken> {
    let token = ActionToken {
        token: random_token(),
        error_id: error_id.to_string(),
        user_id: user_id.to_string(),
        expires_at: now + Duration::seconds(ttl_seconds as i64),
        used: false,
        used_at: None,
        created_at: now,
    };
    let mut table = txn.open_table(ACTION_TOKENS)?;
    put_doc(&mut table, &token.token, &token)?;
    Ok(token)
}

/// Validate and consume a token in one step
///
/// The write transaction serializes redeemers, so the read of `used` and the
/// write flipping it cannot interleave with another redemption.
pub fn redeem(
    txn: &WriteTransaction,
    token: &str,
    error_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> ReplayResult<ActionToken> {
    let mut table = txn.open_table(ACTION_TOKENS)?;
    let mut stored: ActionToken = get_doc(&table, token)?
        .filter(|t: &ActionToken| t.error_id == error_id)
        .ok_or(ReplayError::TokenNotFound)?;

    if stored.used {
        return Err(ReplayError::TokenUsed);
    }
    if now > stored.expires_at {
        return Err(ReplayError::TokenExpired);
    }
    if stored.user_id != user_id {
        return Err(ReplayError::TokenUserMismatch);
    }

    stored.used = true;
    stored.used_at = Some(now);
    put_doc(&mut table, token, &stored)?;
    Ok(stored)
}
