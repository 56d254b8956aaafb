//! Idempotency keys
//!
//! A key binds a request fingerprint to the resources it produced. Replaying
//! the key with the same body returns those resources; a different body is a
//! conflict.

use chrono::{DateTime, Utc};
use redb::WriteTransaction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::tables::IDEMPOTENCY;
use super::{StorageResult, get_doc, put_doc};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: String,
    pub resource_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Stable digest of a request body
pub fn request_fingerprint<T: Serialize>(body: &T) -> String {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

fn scoped(scope: &str, key: &str) -> String {
    format!("{scope}:{key}")
}

pub fn lookup(
    txn: &WriteTransaction,
    scope: &str,
    key: &str,
) -> StorageResult<Option<IdempotencyRecord>> {
    let table = txn.open_table(IDEMPOTENCY)?;
    get_doc(&table, &scoped(scope, key))
}

pub fn record(
    txn: &WriteTransaction,
    scope: &str,
    key: &str,
    record: &IdempotencyRecord,
) -> StorageResult<()> {
    let mut table = txn.open_table(IDEMPOTENCY)?;
    put_doc(&mut table, &scoped(scope, key), record)
}
