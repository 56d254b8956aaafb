//! Canonical encoding and hashing of ledger entries
//!
//! `entry_hash = sha256(prev_hash || "\n" || canonical)` where `canonical` is
//! the entry's fields as `key=value` lines in lexicographic key order.
//! Quantities are rescaled to four decimals and timestamps are RFC 3339 UTC
//! with millisecond precision, so a re-serialized entry hashes identically.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use shared::models::LedgerEntry;

/// prev_hash of the first entry of every item
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const QTY_SCALE: u32 = 4;

pub fn normalize_qty(qty: Decimal) -> Decimal {
    let mut q = qty.round_dp(QTY_SCALE);
    q.rescale(QTY_SCALE);
    q
}

pub fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Canonical text of every hashed field (everything but `entry_hash`)
pub fn canonical_encoding(entry: &LedgerEntry) -> String {
    let fields: [(&str, String); 11] = [
        ("created_at", format_time(&entry.created_at)),
        (
            "expiry_date",
            entry
                .expiry_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
        ),
        ("id", entry.id.clone()),
        ("item_id", entry.item_id.clone()),
        ("lot_number", entry.lot_number.clone().unwrap_or_default()),
        ("qty_delta", normalize_qty(entry.qty_delta).to_string()),
        ("reason", entry.reason.as_str().to_string()),
        ("ref_id", entry.ref_id.clone()),
        ("ref_type", entry.ref_type.as_str().to_string()),
        ("seq", entry.seq.to_string()),
        ("unit", entry.unit.as_str().to_string()),
    ];

    let mut out = String::with_capacity(256);
    for (key, value) in fields {
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// Hash of an entry given its predecessor's hash
pub fn compute_entry_hash(prev_hash: &str, entry: &LedgerEntry) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_encoding(entry).as_bytes());
    hex::encode(hasher.finalize())
}
