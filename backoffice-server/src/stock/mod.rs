//! Stock engine
//!
//! Translates receipts, consumption, count adjustments and waste into ledger
//! appends while keeping lots and the cached `current_stock` projection in
//! step. Every public operation goes through [`StockEngine::run`], which
//! locks the affected items, opens one write transaction and retries a
//! bounded number of times on ledger conflicts.

mod batch;
pub mod counts;
pub mod fifo;
pub mod outbox;
pub mod procurement;

use redb::ReadableTable;
use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    ConsumptionDetail, Item, ItemCreate, ItemUpdate, LedgerReason, Lot, RefType, StockSnapshot,
    Unit, WasteCreate, WasteRecord,
};
use thiserror::Error;

use crate::db::tables::{ITEMS, ITEMS_BY_VENUE, LOTS, LOTS_BY_ITEM, WASTE, WASTE_BY_VENUE};
use crate::db::{Storage, StorageError, get_doc, load_indexed, put_doc};
use crate::ledger::{ItemLocks, Ledger, LedgerError};

pub use batch::{StockBatch, lot_key, reconciliation_lot_id};

/// Attempts per operation when the ledger reports a conflict
const MAX_LEDGER_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StockError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item is archived: {0}")]
    ItemArchived(String),

    #[error("Lot not found: {0}")]
    LotNotFound(String),

    #[error("Lot already exists: {0}")]
    DuplicateLot(String),

    #[error("Insufficient stock for {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Cannot convert {from} to {to} for item {item_id}")]
    UnitMismatch { item_id: String, from: Unit, to: Unit },

    #[error("{0}")]
    InvalidQuantity(String),

    #[error("Supplier not found: {0}")]
    SupplierNotFound(String),

    #[error("Purchase order not found: {0}")]
    PurchaseOrderNotFound(String),

    #[error("{0}")]
    PurchaseOrderState(String),

    #[error("Received quantity exceeds outstanding quantity for {0}")]
    OverReceipt(String),

    #[error("Stock count not found: {0}")]
    StockCountNotFound(String),

    #[error("Stock count already completed: {0}")]
    StockCountClosed(String),
}

impl From<redb::TableError> for StockError {
    fn from(e: redb::TableError) -> Self {
        StockError::Storage(e.into())
    }
}

impl From<redb::StorageError> for StockError {
    fn from(e: redb::StorageError) -> Self {
        StockError::Storage(e.into())
    }
}

pub type StockResult<T> = Result<T, StockError>;

impl From<StockError> for AppError {
    fn from(err: StockError) -> Self {
        let message = err.to_string();
        match err {
            StockError::Storage(e) => e.into(),
            StockError::Ledger(e) => e.into(),
            StockError::ItemNotFound(_) => AppError::with_message(ErrorCode::ItemNotFound, message),
            StockError::ItemArchived(_) => AppError::with_message(ErrorCode::ItemArchived, message),
            StockError::LotNotFound(_) => AppError::with_message(ErrorCode::LotNotFound, message),
            StockError::DuplicateLot(_) => {
                AppError::with_message(ErrorCode::AlreadyExists, message)
            }
            StockError::InsufficientStock { ref item_id, .. } => {
                AppError::with_message(ErrorCode::InsufficientStock, message.clone())
                    .with_detail(format!("items.{item_id}"), message)
            }
            StockError::UnitMismatch { .. } => AppError::with_message(ErrorCode::UnitMismatch, message),
            StockError::InvalidQuantity(_) => AppError::validation(message),
            StockError::SupplierNotFound(_) => {
                AppError::with_message(ErrorCode::SupplierNotFound, message)
            }
            StockError::PurchaseOrderNotFound(_) => {
                AppError::with_message(ErrorCode::PurchaseOrderNotFound, message)
            }
            StockError::PurchaseOrderState(_) => {
                AppError::with_message(ErrorCode::PurchaseOrderState, message)
            }
            StockError::OverReceipt(_) => AppError::with_message(ErrorCode::OverReceipt, message),
            StockError::StockCountNotFound(_) => {
                AppError::with_message(ErrorCode::StockCountNotFound, message)
            }
            StockError::StockCountClosed(_) => {
                AppError::with_message(ErrorCode::StockCountClosed, message)
            }
        }
    }
}

/// Errors that may carry a retriable ledger conflict
pub trait LedgerRetry {
    /// Item whose chain moved, if this is a ledger conflict
    fn conflicting_item(&self) -> Option<String>;
}

impl LedgerRetry for StockError {
    fn conflicting_item(&self) -> Option<String> {
        match self {
            StockError::Ledger(LedgerError::Conflict { item_id, .. }) => Some(item_id.clone()),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct StockEngine {
    storage: Storage,
    locks: ItemLocks,
    ledger: Ledger,
}

impl StockEngine {
    pub fn new(storage: Storage, locks: ItemLocks) -> Self {
        Self {
            ledger: Ledger::new(storage.clone()),
            storage,
            locks,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run `op` in one write transaction with the given items locked
    ///
    /// Commits only if `op` succeeds; LOW_STOCK events are queued in the same
    /// transaction. A ledger conflict resyncs the item projection and retries.
    pub fn run<T, E, F>(&self, item_ids: &[String], mut op: F) -> Result<T, E>
    where
        E: From<StockError> + LedgerRetry,
        F: FnMut(&mut StockBatch<'_>) -> Result<T, E>,
    {
        let _guards = self.locks.lock_all(item_ids.iter().map(String::as_str));
        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn = self.storage.begin_write().map_err(StockError::from)?;
            let mut batch = StockBatch::new(&txn, shared::util::now());

            match op(&mut batch) {
                Ok(value) => {
                    let events = batch.finish()?;
                    txn.commit()
                        .map_err(|e| StockError::from(StorageError::from(e)))?;
                    for event in &events {
                        tracing::info!(
                            item_id = %event.item_id,
                            current_stock = %event.current_stock,
                            reorder_point = %event.reorder_point,
                            "LOW_STOCK event queued"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    drop(batch);
                    drop(txn);
                    match err.conflicting_item() {
                        Some(item_id) if attempt < MAX_LEDGER_ATTEMPTS => {
                            tracing::warn!(item_id = %item_id, attempt, "Ledger conflict, retrying");
                            self.resync_item(&item_id)?;
                        }
                        _ => return Err(err),
                    }
                }
            }
        }
    }

    /// Rebuild an item's cached projection from its ledger
    fn resync_item(&self, item_id: &str) -> StockResult<()> {
        let entries = self.ledger.scan(item_id, None)?;
        let txn = self.storage.begin_write()?;
        {
            let mut table = txn.open_table(ITEMS)?;
            let mut item: Item = get_doc(&table, item_id)?
                .ok_or_else(|| StockError::ItemNotFound(item_id.to_string()))?;
            item.current_stock = entries.iter().map(|e| e.qty_delta).sum();
            item.last_seq = entries.last().map(|e| e.seq).unwrap_or(0);
            put_doc(&mut table, item_id, &item)?;
        }
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    // ========== Items ==========

    pub fn create_item(&self, input: ItemCreate) -> StockResult<Item> {
        if input.reorder_point < Decimal::ZERO || input.reorder_qty < Decimal::ZERO {
            return Err(StockError::InvalidQuantity(
                "reorder point and quantity must not be negative".into(),
            ));
        }
        let now = shared::util::now();
        let item = Item {
            id: shared::util::new_id(),
            venue_id: input.venue_id,
            name: input.name,
            base_unit: input.base_unit,
            reorder_point: input.reorder_point,
            reorder_qty: input.reorder_qty,
            current_stock: Decimal::ZERO,
            last_seq: 0,
            cost: input.cost,
            stock_policy: input.stock_policy.unwrap_or_default(),
            auto_reorder: input.auto_reorder,
            archived: false,
            created_at: now,
            updated_at: now,
        };

        let txn = self.storage.begin_write()?;
        {
            let mut table = txn.open_table(ITEMS)?;
            put_doc(&mut table, &item.id, &item)?;
            let mut index = txn.open_table(ITEMS_BY_VENUE)?;
            index.insert((item.venue_id.as_str(), item.id.as_str()), ())?;
        }
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(item_id = %item.id, venue_id = %item.venue_id, name = %item.name, "Item created");
        Ok(item)
    }

    pub fn get_item(&self, item_id: &str) -> StockResult<Item> {
        self.storage
            .get(ITEMS, item_id)?
            .ok_or_else(|| StockError::ItemNotFound(item_id.to_string()))
    }

    pub fn list_items(&self, venue_id: &str, include_archived: bool) -> StockResult<Vec<Item>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(ITEMS_BY_VENUE)?;
        let docs = read_txn.open_table(ITEMS)?;
        let mut items: Vec<Item> = load_indexed(&index, &docs, venue_id)?;
        if !include_archived {
            items.retain(|i| !i.archived);
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    pub fn update_item(&self, item_id: &str, update: ItemUpdate) -> StockResult<Item> {
        self.modify_item(item_id, |item| {
            if let Some(name) = update.name {
                item.name = name;
            }
            if let Some(rp) = update.reorder_point {
                item.reorder_point = rp;
            }
            if let Some(rq) = update.reorder_qty {
                item.reorder_qty = rq;
            }
            if let Some(policy) = update.stock_policy {
                item.stock_policy = policy;
            }
            if let Some(auto) = update.auto_reorder {
                item.auto_reorder = auto;
            }
        })
    }

    /// Soft-archive; items are never deleted
    pub fn archive_item(&self, item_id: &str) -> StockResult<Item> {
        self.modify_item(item_id, |item| item.archived = true)
    }

    fn modify_item(&self, item_id: &str, f: impl FnOnce(&mut Item)) -> StockResult<Item> {
        let _guards = self.locks.lock_all([item_id]);
        let txn = self.storage.begin_write()?;
        let item = {
            let mut table = txn.open_table(ITEMS)?;
            let mut item: Item = get_doc(&table, item_id)?
                .ok_or_else(|| StockError::ItemNotFound(item_id.to_string()))?;
            f(&mut item);
            item.updated_at = shared::util::now();
            put_doc(&mut table, item_id, &item)?;
            item
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(item)
    }

    // ========== Stock operations ==========

    /// FIFO-consume an item outside of an order
    pub fn consume(
        &self,
        item_id: &str,
        qty: Decimal,
        unit: Option<Unit>,
        ref_type: RefType,
        ref_id: &str,
    ) -> StockResult<Vec<ConsumptionDetail>> {
        self.run(&[item_id.to_string()], |batch| {
            let unit = match unit {
                Some(u) => u,
                None => batch.load_item(item_id)?.base_unit,
            };
            batch.consume(item_id, qty, unit, LedgerReason::Consumption, ref_type, ref_id)
        })
    }

    /// Write off stock; entries are tagged `ref_type=WASTE`
    pub fn log_waste(&self, input: WasteCreate, actor: &str) -> StockResult<WasteRecord> {
        let waste_id = shared::util::new_id();
        self.run(&[input.item_id.clone()], |batch| {
            let item = batch.load_item(&input.item_id)?;
            let details = batch.consume(
                &item.id,
                input.qty,
                item.base_unit,
                LedgerReason::Waste,
                RefType::Waste,
                &waste_id,
            )?;
            let record = WasteRecord {
                id: waste_id.clone(),
                venue_id: item.venue_id.clone(),
                item_id: item.id.clone(),
                qty: input.qty,
                reason_code: input.reason_code.clone(),
                notes: input.notes.clone(),
                details,
                created_by: actor.to_string(),
                created_at: batch.at(),
            };
            let txn = batch.txn();
            let mut table = txn.open_table(WASTE)?;
            put_doc(&mut table, &record.id, &record)?;
            let mut index = txn.open_table(WASTE_BY_VENUE)?;
            index.insert(
                (
                    record.venue_id.as_str(),
                    record.created_at.timestamp_millis(),
                    record.id.as_str(),
                ),
                (),
            )?;
            Ok(record)
        })
    }

    /// Most recent waste records of a venue, newest first
    pub fn list_waste(&self, venue_id: &str, limit: usize) -> StockResult<Vec<WasteRecord>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(WASTE_BY_VENUE)?;
        let docs = read_txn.open_table(WASTE)?;

        let mut out = Vec::new();
        for row in index
            .range((venue_id, i64::MIN, "")..=(venue_id, i64::MAX, "\u{10FFFF}"))?
            .rev()
        {
            if out.len() >= limit {
                break;
            }
            let (key, _) = row?;
            let (_, _, id) = key.value();
            if let Some(record) = get_doc(&docs, id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Every lot of an item, including depleted ones
    pub fn lots(&self, item_id: &str) -> StockResult<Vec<Lot>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(LOTS_BY_ITEM)?;
        let docs = read_txn.open_table(LOTS)?;
        Ok(load_indexed(&index, &docs, item_id)?)
    }

    /// Stock position of an item
    pub fn snapshot(&self, item_id: &str) -> StockResult<StockSnapshot> {
        let item = self.get_item(item_id)?;
        let mut lots = self.lots(item_id)?;

        lots.retain(|l| !l.is_depleted() && !(l.reconciliation && l.qty_remaining.is_zero()));
        lots.sort_by(|a, b| a.received_at.cmp(&b.received_at).then_with(|| a.id.cmp(&b.id)));

        Ok(StockSnapshot {
            item_id: item.id,
            current_stock: item.current_stock,
            last_seq: item.last_seq,
            reorder_needed: item.current_stock <= item.reorder_point,
            lots,
        })
    }
}

#[cfg(test)]
mod tests;
