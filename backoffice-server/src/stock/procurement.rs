//! Suppliers and purchase orders
//!
//! `DRAFT -> APPROVED -> PARTIALLY_RECEIVED* -> RECEIVED`. Receiving books one
//! lot and one RECEIPT entry per line through the stock batch.

use redb::ReadableTable;
use rust_decimal::Decimal;
use shared::models::{
    Lot, PurchaseOrder, PurchaseOrderCreate, PurchaseOrderLine, PurchaseOrderStatus,
    ReceivePurchaseOrder, RefType, Supplier, SupplierCreate,
};

use super::{StockEngine, StockError, StockResult};
use crate::db::tables::{ITEMS, PURCHASE_ORDERS, SUPPLIERS};
use crate::db::{StorageError, get_doc, next_counter, put_doc};

impl StockEngine {
    pub fn create_supplier(&self, input: SupplierCreate) -> StockResult<Supplier> {
        let supplier = Supplier {
            id: shared::util::new_id(),
            venue_id: input.venue_id,
            name: input.name,
            email: input.email,
            phone: input.phone,
            created_at: shared::util::now(),
        };
        let txn = self.storage.begin_write()?;
        {
            let mut table = txn.open_table(SUPPLIERS)?;
            put_doc(&mut table, &supplier.id, &supplier)?;
        }
        txn.commit().map_err(StorageError::from)?;
        Ok(supplier)
    }

    pub fn list_suppliers(&self, venue_id: &str) -> StockResult<Vec<Supplier>> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(SUPPLIERS)?;
        let mut out = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let supplier: Supplier =
                serde_json::from_slice(value.value()).map_err(StorageError::from)?;
            if supplier.venue_id == venue_id {
                out.push(supplier);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    pub fn create_purchase_order(
        &self,
        input: PurchaseOrderCreate,
        actor: &str,
    ) -> StockResult<PurchaseOrder> {
        let txn = self.storage.begin_write()?;
        let po = {
            let suppliers = txn.open_table(SUPPLIERS)?;
            if get_doc::<Supplier, _>(&suppliers, &input.supplier_id)?.is_none() {
                return Err(StockError::SupplierNotFound(input.supplier_id));
            }
            let items = txn.open_table(ITEMS)?;
            let mut lines = Vec::with_capacity(input.lines.len());
            for line in input.lines {
                if items.get(line.item_id.as_str())?.is_none() {
                    return Err(StockError::ItemNotFound(line.item_id));
                }
                if line.qty <= Decimal::ZERO {
                    return Err(StockError::InvalidQuantity(format!(
                        "ordered quantity for {} must be positive",
                        line.item_id
                    )));
                }
                lines.push(PurchaseOrderLine {
                    item_id: line.item_id,
                    qty_ordered: line.qty,
                    qty_received: Decimal::ZERO,
                    unit_cost: line.unit_cost,
                });
            }

            let n = next_counter(&txn, "purchase_orders")?;
            let po = PurchaseOrder {
                id: shared::util::new_id(),
                display_id: shared::util::display_id("PO", n),
                venue_id: input.venue_id,
                supplier_id: input.supplier_id,
                status: PurchaseOrderStatus::Draft,
                lines,
                created_by: actor.to_string(),
                created_at: shared::util::now(),
                approved_at: None,
                received_at: None,
            };
            let mut table = txn.open_table(PURCHASE_ORDERS)?;
            put_doc(&mut table, &po.id, &po)?;
            po
        };
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(po_id = %po.id, display_id = %po.display_id, "Purchase order created");
        Ok(po)
    }

    pub fn get_purchase_order(&self, po_id: &str) -> StockResult<PurchaseOrder> {
        self.storage
            .get(PURCHASE_ORDERS, po_id)?
            .ok_or_else(|| StockError::PurchaseOrderNotFound(po_id.to_string()))
    }

    pub fn approve_purchase_order(&self, po_id: &str) -> StockResult<PurchaseOrder> {
        let txn = self.storage.begin_write()?;
        let po = {
            let mut table = txn.open_table(PURCHASE_ORDERS)?;
            let mut po: PurchaseOrder = get_doc(&table, po_id)?
                .ok_or_else(|| StockError::PurchaseOrderNotFound(po_id.to_string()))?;
            if po.status != PurchaseOrderStatus::Draft {
                return Err(StockError::PurchaseOrderState(format!(
                    "Purchase order {} is {:?}, only DRAFT can be approved",
                    po.display_id, po.status
                )));
            }
            po.status = PurchaseOrderStatus::Approved;
            po.approved_at = Some(shared::util::now());
            put_doc(&mut table, po_id, &po)?;
            po
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(po)
    }

    /// Receive goods against an approved purchase order
    pub fn receive_purchase_order(
        &self,
        po_id: &str,
        input: ReceivePurchaseOrder,
    ) -> StockResult<(PurchaseOrder, Vec<Lot>)> {
        let item_ids: Vec<String> = input.lines.iter().map(|l| l.item_id.clone()).collect();

        self.run(&item_ids, |batch| {
            let txn = batch.txn();
            let mut po: PurchaseOrder = {
                let table = txn.open_table(PURCHASE_ORDERS)?;
                get_doc(&table, po_id)?
                    .ok_or_else(|| StockError::PurchaseOrderNotFound(po_id.to_string()))?
            };
            if !matches!(
                po.status,
                PurchaseOrderStatus::Approved | PurchaseOrderStatus::PartiallyReceived
            ) {
                return Err(StockError::PurchaseOrderState(format!(
                    "Purchase order {} is {:?}, only APPROVED orders can be received",
                    po.display_id, po.status
                )));
            }

            let mut lots = Vec::with_capacity(input.lines.len());
            for line in &input.lines {
                let Some(po_line) = po.lines.iter_mut().find(|l| l.item_id == line.item_id) else {
                    return Err(StockError::InvalidQuantity(format!(
                        "Item {} is not on purchase order {}",
                        line.item_id, po.display_id
                    )));
                };
                if line.qty_received > po_line.outstanding() {
                    return Err(StockError::OverReceipt(line.item_id.clone()));
                }
                po_line.qty_received += line.qty_received;
                let unit_cost = line.unit_cost.unwrap_or(po_line.unit_cost);

                lots.push(batch.receive(
                    &line.item_id,
                    line.qty_received,
                    unit_cost,
                    line.lot_number.clone(),
                    line.expiry_date,
                    RefType::PurchaseOrder,
                    &po.id,
                )?);
            }

            let now = batch.at();
            if po.lines.iter().all(|l| l.outstanding().is_zero()) {
                po.status = PurchaseOrderStatus::Received;
                po.received_at = Some(now);
            } else {
                po.status = PurchaseOrderStatus::PartiallyReceived;
            }
            let mut table = txn.open_table(PURCHASE_ORDERS)?;
            put_doc(&mut table, &po.id, &po)?;

            tracing::info!(
                po_id = %po.id,
                lines = lots.len(),
                status = ?po.status,
                "Purchase order received"
            );
            Ok((po, lots))
        })
    }
}
