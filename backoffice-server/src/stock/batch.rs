//! Stock mutations inside one write transaction
//!
//! A [`StockBatch`] borrows the caller's transaction so lot drains, ledger
//! entries and whatever else the caller writes commit together. Nothing is
//! visible until the caller commits; dropping the transaction undoes every
//! lot change made through the batch.

use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, WriteTransaction};
use rust_decimal::Decimal;
use shared::models::{
    ConsumptionDetail, Item, LedgerEntry, LedgerReason, Lot, LowStockEvent, OutboxEvent,
    OutboxPayload, RefType, StockPolicy, Unit,
};
use std::collections::BTreeSet;

use super::{StockError, StockResult, fifo};
use crate::db::tables::{ITEMS, LOTS, LOTS_BY_ITEM, OUTBOX};
use crate::db::{get_doc, index_ids, next_counter, put_doc};
use crate::ledger::{self, EntryDraft};

/// Id of an item's reconciliation lot
pub fn reconciliation_lot_id(item_id: &str) -> String {
    format!("RECON-{item_id}")
}

/// Storage key of a supplier lot
///
/// Suppliers number their own lots, so the same number can arrive for two
/// different items.
pub fn lot_key(item_id: &str, lot_number: &str) -> String {
    format!("{item_id}/{lot_number}")
}

pub struct StockBatch<'t> {
    txn: &'t WriteTransaction,
    at: DateTime<Utc>,
    touched: BTreeSet<String>,
}

impl<'t> StockBatch<'t> {
    pub fn new(txn: &'t WriteTransaction, at: DateTime<Utc>) -> Self {
        Self {
            txn,
            at,
            touched: BTreeSet::new(),
        }
    }

    /// The underlying transaction, for writes outside the stock tables
    pub fn txn(&self) -> &'t WriteTransaction {
        self.txn
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    // ========== Documents ==========

    pub fn load_item(&self, item_id: &str) -> StockResult<Item> {
        let table = self.txn.open_table(ITEMS)?;
        get_doc(&table, item_id)?.ok_or_else(|| StockError::ItemNotFound(item_id.to_string()))
    }

    fn save_item(&self, item: &Item) -> StockResult<()> {
        let mut table = self.txn.open_table(ITEMS)?;
        put_doc(&mut table, &item.id, item)?;
        Ok(())
    }

    fn load_lot(&self, lot_id: &str) -> StockResult<Option<Lot>> {
        let table = self.txn.open_table(LOTS)?;
        Ok(get_doc(&table, lot_id)?)
    }

    fn save_lot(&self, lot: &Lot) -> StockResult<()> {
        let mut table = self.txn.open_table(LOTS)?;
        put_doc(&mut table, &lot.id, lot)?;
        let mut index = self.txn.open_table(LOTS_BY_ITEM)?;
        index.insert((lot.item_id.as_str(), lot.id.as_str()), ())?;
        Ok(())
    }

    pub fn lots_for(&self, item_id: &str) -> StockResult<Vec<Lot>> {
        let index = self.txn.open_table(LOTS_BY_ITEM)?;
        let lots = self.txn.open_table(LOTS)?;
        let mut out = Vec::new();
        for id in index_ids(&index, item_id)? {
            if let Some(lot) = get_doc::<Lot, _>(&lots, &id)? {
                out.push(lot);
            }
        }
        Ok(out)
    }

    fn reconciliation_lot(&self, item: &Item) -> StockResult<Lot> {
        let id = reconciliation_lot_id(&item.id);
        match self.load_lot(&id)? {
            Some(lot) => Ok(lot),
            None => Ok(Lot {
                id,
                item_id: item.id.clone(),
                lot_number: None,
                received_at: self.at,
                expiry_date: None,
                qty_received: Decimal::ZERO,
                qty_remaining: Decimal::ZERO,
                unit_cost: item.cost,
                source_ref: None,
                reconciliation: true,
            }),
        }
    }

    /// Append through the ledger and fold the entry into the item projection
    fn append(&mut self, item: &mut Item, draft: EntryDraft) -> StockResult<LedgerEntry> {
        let entry = ledger::append(self.txn, draft, Some(item.last_seq), self.at)?;
        item.current_stock += entry.qty_delta;
        item.last_seq = entry.seq;
        item.updated_at = self.at;
        self.touched.insert(item.id.clone());
        Ok(entry)
    }

    fn to_base_unit(item: &Item, qty: Decimal, unit: Unit) -> StockResult<Decimal> {
        unit.convert(qty, item.base_unit)
            .ok_or_else(|| StockError::UnitMismatch {
                item_id: item.id.clone(),
                from: unit,
                to: item.base_unit,
            })
    }

    // ========== Mutations ==========

    /// Book a goods receipt as a new lot plus a RECEIPT entry
    #[allow(clippy::too_many_arguments)]
    pub fn receive(
        &mut self,
        item_id: &str,
        qty: Decimal,
        unit_cost: i64,
        lot_number: Option<String>,
        expiry_date: Option<NaiveDate>,
        ref_type: RefType,
        ref_id: &str,
    ) -> StockResult<Lot> {
        if qty <= Decimal::ZERO {
            return Err(StockError::InvalidQuantity(format!(
                "receipt quantity for {item_id} must be positive"
            )));
        }
        let mut item = self.load_item(item_id)?;
        if item.archived {
            return Err(StockError::ItemArchived(item.id));
        }

        let lot_number = lot_number.unwrap_or_else(|| format!("LOT-{}", shared::util::new_id()));
        let lot_id = lot_key(&item.id, &lot_number);
        if self.load_lot(&lot_id)?.is_some() {
            return Err(StockError::DuplicateLot(lot_number));
        }

        let lot = Lot {
            id: lot_id,
            item_id: item.id.clone(),
            lot_number: Some(lot_number),
            received_at: self.at,
            expiry_date,
            qty_received: qty,
            qty_remaining: qty,
            unit_cost,
            source_ref: Some(ref_id.to_string()),
            reconciliation: false,
        };
        self.save_lot(&lot)?;

        let draft = EntryDraft {
            item_id: item.id.clone(),
            qty_delta: qty,
            unit: item.base_unit,
            reason: LedgerReason::Receipt,
            ref_type,
            ref_id: ref_id.to_string(),
            lot_number: lot.lot_number.clone(),
            expiry_date,
        };
        self.append(&mut item, draft)?;
        item.cost = unit_cost;
        self.save_item(&item)?;
        Ok(lot)
    }

    /// FIFO-consume `qty` (in `unit`) of an item
    ///
    /// `reason` is CONSUMPTION for sales and WASTE for write-offs.
    pub fn consume(
        &mut self,
        item_id: &str,
        qty: Decimal,
        unit: Unit,
        reason: LedgerReason,
        ref_type: RefType,
        ref_id: &str,
    ) -> StockResult<Vec<ConsumptionDetail>> {
        let mut item = self.load_item(item_id)?;
        let qty = Self::to_base_unit(&item, qty, unit)?;
        if qty <= Decimal::ZERO {
            return Err(StockError::InvalidQuantity(format!(
                "consumption quantity for {item_id} must be positive"
            )));
        }

        if item.stock_policy == StockPolicy::Block && qty > item.current_stock {
            return Err(StockError::InsufficientStock {
                item_id: item.id,
                requested: qty,
                available: item.current_stock,
            });
        }

        let lots = self.lots_for(&item.id)?;
        let plan = fifo::plan(&lots, qty);
        let mut details = Vec::with_capacity(plan.draws.len() + 1);

        for draw in plan.draws {
            let Some(mut lot) = lots.iter().find(|l| l.id == draw.lot_id).cloned() else {
                return Err(StockError::LotNotFound(draw.lot_id));
            };
            lot.qty_remaining -= draw.qty;
            self.save_lot(&lot)?;

            let draft = EntryDraft {
                item_id: item.id.clone(),
                qty_delta: -draw.qty,
                unit: item.base_unit,
                reason,
                ref_type,
                ref_id: ref_id.to_string(),
                lot_number: lot.lot_number.clone(),
                expiry_date: lot.expiry_date,
            };
            let entry = self.append(&mut item, draft)?;
            details.push(ConsumptionDetail {
                item_id: item.id.clone(),
                lot_id: Some(lot.id),
                qty: draw.qty,
                unit_cost: lot.unit_cost,
                expiry_date: lot.expiry_date,
                seq: entry.seq,
            });
        }

        if plan.shortfall > Decimal::ZERO {
            tracing::warn!(
                item_id = %item.id,
                shortfall = %plan.shortfall,
                ref_id = %ref_id,
                "Consuming beyond available lots, stock goes negative"
            );
            let mut recon = self.reconciliation_lot(&item)?;
            recon.qty_remaining -= plan.shortfall;
            self.save_lot(&recon)?;

            let draft = EntryDraft {
                item_id: item.id.clone(),
                qty_delta: -plan.shortfall,
                unit: item.base_unit,
                reason,
                ref_type,
                ref_id: ref_id.to_string(),
                lot_number: None,
                expiry_date: None,
            };
            let entry = self.append(&mut item, draft)?;
            details.push(ConsumptionDetail {
                item_id: item.id.clone(),
                lot_id: None,
                qty: plan.shortfall,
                unit_cost: item.cost,
                expiry_date: None,
                seq: entry.seq,
            });
        }

        self.save_item(&item)?;
        Ok(details)
    }

    /// Book a count variance through the reconciliation lot
    pub fn adjust(
        &mut self,
        item_id: &str,
        delta: Decimal,
        count_id: &str,
    ) -> StockResult<Option<LedgerEntry>> {
        if delta.is_zero() {
            return Ok(None);
        }
        let mut item = self.load_item(item_id)?;
        let mut recon = self.reconciliation_lot(&item)?;
        recon.qty_remaining += delta;
        if delta > Decimal::ZERO {
            recon.qty_received += delta;
        }
        self.save_lot(&recon)?;

        let draft = EntryDraft {
            item_id: item.id.clone(),
            qty_delta: delta,
            unit: item.base_unit,
            reason: LedgerReason::StockAdjustment,
            ref_type: RefType::Count,
            ref_id: count_id.to_string(),
            lot_number: None,
            expiry_date: None,
        };
        let entry = self.append(&mut item, draft)?;
        self.save_item(&item)?;
        Ok(Some(entry))
    }

    /// Credit back every consumption booked against `ref_type:ref_id`
    ///
    /// Each original draw gets a compensating RECEIPT tagged `VOID` on the
    /// same lot; unbacked draws go back to the reconciliation lot.
    pub fn reverse(&mut self, ref_type: RefType, ref_id: &str) -> StockResult<Vec<LedgerEntry>> {
        let originals: Vec<LedgerEntry> = ledger::entries_for_ref(self.txn, ref_type, ref_id)?
            .into_iter()
            .filter(|e| e.reason == LedgerReason::Consumption)
            .collect();

        let mut credits = Vec::with_capacity(originals.len());
        for original in originals {
            let qty = -original.qty_delta;
            let mut item = self.load_item(&original.item_id)?;

            let existing = match &original.lot_number {
                Some(number) => self.load_lot(&lot_key(&item.id, number))?,
                None => None,
            };
            let mut lot = match existing {
                Some(lot) => lot,
                None => self.reconciliation_lot(&item)?,
            };
            lot.qty_remaining += qty;
            self.save_lot(&lot)?;

            let draft = EntryDraft {
                item_id: item.id.clone(),
                qty_delta: qty,
                unit: original.unit,
                reason: LedgerReason::Receipt,
                ref_type: RefType::Void,
                ref_id: ref_id.to_string(),
                lot_number: lot.lot_number.clone(),
                expiry_date: lot.expiry_date,
            };
            let entry = self.append(&mut item, draft)?;
            self.save_item(&item)?;
            credits.push(entry);
        }
        Ok(credits)
    }

    /// Queue LOW_STOCK events for touched items at or below their reorder point
    ///
    /// Called once per operation, so an item produces at most one event.
    pub fn finish(self) -> StockResult<Vec<LowStockEvent>> {
        let mut events = Vec::new();
        for item_id in &self.touched {
            let item = self.load_item(item_id)?;
            if !item.auto_reorder || item.current_stock > item.reorder_point {
                continue;
            }
            let event = LowStockEvent {
                item_id: item.id.clone(),
                venue_id: item.venue_id.clone(),
                item_name: item.name.clone(),
                current_stock: item.current_stock,
                reorder_point: item.reorder_point,
                reorder_qty: item.reorder_qty,
                at: self.at,
            };
            let seq = next_counter(self.txn, "outbox")?;
            let outbox_event = OutboxEvent {
                seq,
                payload: OutboxPayload::LowStock(event.clone()),
                created_at: self.at,
                attempts: 0,
            };
            let mut outbox = self.txn.open_table(OUTBOX)?;
            let value = serde_json::to_vec(&outbox_event).map_err(crate::db::StorageError::from)?;
            outbox.insert(seq, value.as_slice())?;
            events.push(event);
        }
        Ok(events)
    }
}
