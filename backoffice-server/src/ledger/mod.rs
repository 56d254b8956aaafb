//! Append-only, hash-chained stock ledger
//!
//! Entries are keyed by `(item_id, seq)`; `seq` starts at 1 and is
//! contiguous per item. Each entry commits to its predecessor through
//! `prev_hash`, so editing any stored entry breaks [`verify`] from that entry
//! onwards.
//!
//! Appends run inside the caller's write transaction. The caller holds the
//! item's lock (see [`ItemLocks`]) and passes the seq its projection was
//! built on; a stale seq is a [`LedgerError::Conflict`].

pub mod hash;
pub mod locks;
pub mod verifier;

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, WriteTransaction};
use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{ChainVerification, LedgerEntry, LedgerReason, RefType, Unit};
use thiserror::Error;

use crate::db::tables::{LEDGER, LEDGER_BY_REF};
use crate::db::{Storage, StorageError};

pub use hash::{GENESIS_HASH, compute_entry_hash};
pub use locks::{ItemGuard, ItemLocks};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Ledger for {item_id} advanced to seq {actual}, expected {expected}")]
    Conflict {
        item_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("{reason:?} entry for {item_id} has invalid sign: {qty_delta}")]
    InvalidDelta {
        item_id: String,
        reason: LedgerReason,
        qty_delta: Decimal,
    },

    #[error("Ledger chain for {item_id} is broken at seq {seq}")]
    Tampered { item_id: String, seq: u64 },
}

impl From<redb::TableError> for LedgerError {
    fn from(e: redb::TableError) -> Self {
        LedgerError::Storage(e.into())
    }
}

impl From<redb::StorageError> for LedgerError {
    fn from(e: redb::StorageError) -> Self {
        LedgerError::Storage(e.into())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Storage(e.into())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Storage(e) => e.into(),
            LedgerError::Conflict { .. } => {
                AppError::with_message(ErrorCode::LedgerConflict, err.to_string())
            }
            LedgerError::InvalidDelta { .. } => AppError::validation(err.to_string()),
            LedgerError::Tampered { .. } => {
                AppError::with_message(ErrorCode::LedgerTampered, err.to_string())
            }
        }
    }
}

/// Fields of an entry before it is chained
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub item_id: String,
    pub qty_delta: Decimal,
    pub unit: Unit,
    pub reason: LedgerReason,
    pub ref_type: RefType,
    pub ref_id: String,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl EntryDraft {
    fn check_sign(&self) -> LedgerResult<()> {
        let ok = match self.reason {
            LedgerReason::Receipt => self.qty_delta > Decimal::ZERO,
            LedgerReason::Consumption | LedgerReason::Waste => self.qty_delta < Decimal::ZERO,
            LedgerReason::StockAdjustment | LedgerReason::Transfer => !self.qty_delta.is_zero(),
        };
        if ok {
            Ok(())
        } else {
            Err(LedgerError::InvalidDelta {
                item_id: self.item_id.clone(),
                reason: self.reason,
                qty_delta: self.qty_delta,
            })
        }
    }
}

/// `ref_type:ref_id`, the first component of the by-reference index
pub fn ref_key(ref_type: RefType, ref_id: &str) -> String {
    format!("{}:{}", ref_type.as_str(), ref_id)
}

/// Last entry of an item inside a write transaction
pub fn last_entry(txn: &WriteTransaction, item_id: &str) -> LedgerResult<Option<LedgerEntry>> {
    let table = txn.open_table(LEDGER)?;
    let mut range = table.range((item_id, 0u64)..=(item_id, u64::MAX))?;
    match range.next_back() {
        Some(row) => {
            let (_key, value) = row?;
            Ok(Some(serde_json::from_slice(value.value())?))
        }
        None => Ok(None),
    }
}

/// Append one entry to an item's chain
///
/// A tail entry whose hash does not verify is `Tampered`. `expected_seq` is the seq of the last entry the caller has seen (0 for an
/// empty chain). `None` skips the check.
pub fn append(
    txn: &WriteTransaction,
    draft: EntryDraft,
    expected_seq: Option<u64>,
    at: DateTime<Utc>,
) -> LedgerResult<LedgerEntry> {
    draft.check_sign()?;

    let last = last_entry(txn, &draft.item_id)?;
    let (last_seq, prev_hash) = match &last {
        Some(e) => (e.seq, e.entry_hash.clone()),
        None => (0, GENESIS_HASH.to_string()),
    };
    // Never extend a chain whose tail no longer hashes to itself
    if let Some(e) = &last {
        if compute_entry_hash(&e.prev_hash, e) != e.entry_hash {
            return Err(LedgerError::Tampered {
                item_id: draft.item_id,
                seq: e.seq,
            });
        }
    }

    if let Some(expected) = expected_seq {
        if expected != last_seq {
            return Err(LedgerError::Conflict {
                item_id: draft.item_id,
                expected,
                actual: last_seq,
            });
        }
    }

    let mut entry = LedgerEntry {
        id: shared::util::new_id(),
        item_id: draft.item_id,
        seq: last_seq + 1,
        qty_delta: hash::normalize_qty(draft.qty_delta),
        unit: draft.unit,
        reason: draft.reason,
        ref_type: draft.ref_type,
        ref_id: draft.ref_id,
        lot_number: draft.lot_number,
        expiry_date: draft.expiry_date,
        prev_hash,
        entry_hash: String::new(),
        created_at: at,
    };
    entry.entry_hash = compute_entry_hash(&entry.prev_hash, &entry);

    {
        let mut table = txn.open_table(LEDGER)?;
        let value = serde_json::to_vec(&entry)?;
        table.insert((entry.item_id.as_str(), entry.seq), value.as_slice())?;
    }
    {
        let mut index = txn.open_table(LEDGER_BY_REF)?;
        let key = ref_key(entry.ref_type, &entry.ref_id);
        index.insert((key.as_str(), entry.item_id.as_str(), entry.seq), ())?;
    }

    tracing::debug!(
        item_id = %entry.item_id,
        seq = entry.seq,
        qty_delta = %entry.qty_delta,
        reason = entry.reason.as_str(),
        "Ledger entry appended"
    );
    Ok(entry)
}

/// Entries written for a reference inside a write transaction, in (item, seq) order
pub fn entries_for_ref(
    txn: &WriteTransaction,
    ref_type: RefType,
    ref_id: &str,
) -> LedgerResult<Vec<LedgerEntry>> {
    let key = ref_key(ref_type, ref_id);
    let index = txn.open_table(LEDGER_BY_REF)?;
    let ledger = txn.open_table(LEDGER)?;

    let mut out = Vec::new();
    for row in index.range((key.as_str(), "", 0u64)..)? {
        let (k, _) = row?;
        let (rk, item_id, seq) = k.value();
        if rk != key {
            break;
        }
        if let Some(value) = ledger.get((item_id, seq))? {
            out.push(serde_json::from_slice(value.value())?);
        }
    }
    Ok(out)
}

/// Read side of the ledger
#[derive(Clone)]
pub struct Ledger {
    storage: Storage,
}

impl Ledger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Entries of an item with `seq > since_seq`, ordered by seq
    pub fn scan(&self, item_id: &str, since_seq: Option<u64>) -> LedgerResult<Vec<LedgerEntry>> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(LEDGER)?;
        let start = since_seq.map(|s| s.saturating_add(1)).unwrap_or(0);

        let mut entries = Vec::new();
        for row in table.range((item_id, start)..=(item_id, u64::MAX))? {
            let (_key, value) = row?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// Last `limit` entries of an item, newest first
    pub fn tail(&self, item_id: &str, limit: usize) -> LedgerResult<Vec<LedgerEntry>> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(LEDGER)?;

        let mut entries = Vec::with_capacity(limit);
        for row in table.range((item_id, 0u64)..=(item_id, u64::MAX))?.rev().take(limit) {
            let (_key, value) = row?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }

    /// Items that have at least one entry
    pub fn item_ids(&self) -> LedgerResult<Vec<String>> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(LEDGER)?;

        let mut ids: Vec<String> = Vec::new();
        for row in table.iter()? {
            let (key, _) = row?;
            let (item_id, _) = key.value();
            if ids.last().map(String::as_str) != Some(item_id) {
                ids.push(item_id.to_string());
            }
        }
        Ok(ids)
    }

    /// Items touched by entries of a reference, sorted and deduplicated
    pub fn items_for_ref(&self, ref_type: RefType, ref_id: &str) -> LedgerResult<Vec<String>> {
        let key = ref_key(ref_type, ref_id);
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(LEDGER_BY_REF)?;

        let mut ids: Vec<String> = Vec::new();
        for row in index.range((key.as_str(), "", 0u64)..)? {
            let (k, _) = row?;
            let (rk, item_id, _) = k.value();
            if rk != key {
                break;
            }
            if ids.last().map(String::as_str) != Some(item_id) {
                ids.push(item_id.to_string());
            }
        }
        Ok(ids)
    }

    /// Recompute every hash of an item's chain
    pub fn verify(&self, item_id: &str) -> LedgerResult<ChainVerification> {
        let entries = self.scan(item_id, None)?;
        Ok(verify_chain(item_id, &entries))
    }

}

/// Check seq contiguity, prev_hash links and entry hashes
pub fn verify_chain(item_id: &str, entries: &[LedgerEntry]) -> ChainVerification {
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut first_broken_seq = None;

    for (idx, entry) in entries.iter().enumerate() {
        let expected_seq = idx as u64 + 1;
        let recomputed = compute_entry_hash(&entry.prev_hash, entry);
        if entry.seq != expected_seq || entry.prev_hash != prev_hash || recomputed != entry.entry_hash
        {
            first_broken_seq = Some(entry.seq.min(expected_seq));
            break;
        }
        prev_hash = entry.entry_hash.clone();
    }

    ChainVerification {
        item_id: item_id.to_string(),
        ok: first_broken_seq.is_none(),
        entries: entries.len() as u64,
        first_broken_seq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft(item: &str, qty: Decimal, reason: LedgerReason) -> EntryDraft {
        EntryDraft {
            item_id: item.into(),
            qty_delta: qty,
            unit: Unit::Each,
            reason,
            ref_type: RefType::PurchaseOrder,
            ref_id: "po1".into(),
            lot_number: None,
            expiry_date: None,
        }
    }

    #[test]
    fn test_append_chains_entries() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let now = shared::util::now();
        let e1 = append(&txn, draft("x", dec!(10), LedgerReason::Receipt), Some(0), now).unwrap();
        let e2 = append(&txn, draft("x", dec!(-3), LedgerReason::Consumption), Some(1), now).unwrap();
        let other = append(&txn, draft("y", dec!(1), LedgerReason::Receipt), None, now).unwrap();
        txn.commit().unwrap();

        assert_eq!(e1.seq, 1);
        assert_eq!(e1.prev_hash, GENESIS_HASH);
        assert_eq!(e2.seq, 2);
        assert_eq!(e2.prev_hash, e1.entry_hash);
        assert_eq!(other.seq, 1);

        let ledger = Ledger::new(storage);
        let entries = ledger.scan("x", None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(ledger.scan("x", Some(1)).unwrap().len(), 1);
        assert!(ledger.verify("x").unwrap().ok);
        assert_eq!(ledger.tail("x", 1).unwrap()[0].seq, 2);
        assert_eq!(ledger.item_ids().unwrap(), vec!["x", "y"]);
    }

    #[test]
    fn test_stale_seq_is_conflict() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let now = shared::util::now();
        append(&txn, draft("x", dec!(10), LedgerReason::Receipt), Some(0), now).unwrap();
        let err = append(&txn, draft("x", dec!(1), LedgerReason::Receipt), Some(0), now).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { expected: 0, actual: 1, .. }));
        let app: AppError = err.into();
        assert_eq!(app.code, ErrorCode::LedgerConflict);
    }

    #[test]
    fn test_sign_rules() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let now = shared::util::now();
        assert!(append(&txn, draft("x", dec!(-1), LedgerReason::Receipt), None, now).is_err());
        assert!(append(&txn, draft("x", dec!(1), LedgerReason::Consumption), None, now).is_err());
        assert!(append(&txn, draft("x", dec!(1), LedgerReason::Waste), None, now).is_err());
        assert!(append(&txn, dec_adjust(dec!(0)), None, now).is_err());
        assert!(append(&txn, dec_adjust(dec!(-2)), None, now).is_ok());
    }

    fn dec_adjust(qty: Decimal) -> EntryDraft {
        let mut d = draft("x", qty, LedgerReason::StockAdjustment);
        d.ref_type = RefType::Count;
        d
    }

    #[test]
    fn test_entries_for_ref() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let now = shared::util::now();
        let mut d = draft("x", dec!(-1), LedgerReason::Consumption);
        d.ref_type = RefType::Order;
        d.ref_id = "o1".into();
        append(&txn, d.clone(), None, now).unwrap();
        d.item_id = "y".into();
        append(&txn, d.clone(), None, now).unwrap();
        d.ref_id = "o2".into();
        append(&txn, d, None, now).unwrap();

        let entries = entries_for_ref(&txn, RefType::Order, "o1").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.ref_id == "o1"));
    }

    #[test]
    fn test_verify_detects_edit_and_gap() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let now = shared::util::now();
        let mut entries = Vec::new();
        for i in 0..4 {
            let qty = if i == 0 { dec!(10) } else { dec!(-1) };
            let reason = if i == 0 { LedgerReason::Receipt } else { LedgerReason::Consumption };
            entries.push(append(&txn, draft("x", qty, reason), None, now).unwrap());
        }

        let mut edited = entries.clone();
        edited[2].qty_delta = dec!(-5);
        let v = verify_chain("x", &edited);
        assert!(!v.ok);
        assert_eq!(v.first_broken_seq, Some(3));

        let mut gapped = entries.clone();
        gapped.remove(1);
        assert_eq!(verify_chain("x", &gapped).first_broken_seq, Some(2));

        assert!(verify_chain("x", &entries).ok);
    }

    #[test]
    fn test_tampered_tail_blocks_append() {
        let storage = Storage::open_in_memory().unwrap();
        let now = shared::util::now();
        let txn = storage.begin_write().unwrap();
        let entry = append(&txn, draft("x", dec!(10), LedgerReason::Receipt), None, now).unwrap();
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        {
            let mut forged = entry.clone();
            forged.qty_delta = dec!(1000);
            let mut table = txn.open_table(LEDGER).unwrap();
            let value = serde_json::to_vec(&forged).unwrap();
            table.insert(("x", 1u64), value.as_slice()).unwrap();
        }
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        let err = append(&txn, draft("x", dec!(-1), LedgerReason::Consumption), None, now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Tampered { seq: 1, .. }));
        let app: AppError = err.into();
        assert_eq!(app.code, ErrorCode::LedgerTampered);
    }
}
