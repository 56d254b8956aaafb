use super::*;
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use shared::models::{
    CountLineInput, PurchaseOrderCreate, PurchaseOrderLineInput, PurchaseOrderStatus,
    ReceiveLine, ReceivePurchaseOrder, StockCountStatus, StockPolicy, SupplierCreate,
};

use crate::db::Storage;
use crate::ledger::ItemLocks;

fn engine() -> StockEngine {
    let storage = Storage::open_in_memory().unwrap();
    StockEngine::new(storage, ItemLocks::new())
}

fn item(engine: &StockEngine, policy: StockPolicy) -> Item {
    engine
        .create_item(ItemCreate {
            venue_id: "v1".into(),
            name: "Tomato".into(),
            base_unit: Unit::Each,
            reorder_point: dec!(2),
            reorder_qty: dec!(20),
            cost: 30,
            stock_policy: Some(policy),
            auto_reorder: true,
        })
        .unwrap()
}

fn receive(engine: &StockEngine, item_id: &str, lot: &str, qty: Decimal, expiry: Option<NaiveDate>) {
    engine
        .run::<_, StockError, _>(&[item_id.to_string()], |batch| {
            batch.receive(
                item_id,
                qty,
                25,
                Some(lot.to_string()),
                expiry,
                RefType::PurchaseOrder,
                "po-1",
            )
        })
        .unwrap();
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

/// Σ ledger = current_stock = Σ lots
fn assert_balanced(engine: &StockEngine, item_id: &str) {
    let item = engine.get_item(item_id).unwrap();
    let ledger_sum: Decimal = engine
        .ledger()
        .scan(item_id, None)
        .unwrap()
        .iter()
        .map(|e| e.qty_delta)
        .sum();
    let lot_sum: Decimal = engine
        .lots(item_id)
        .unwrap()
        .iter()
        .map(|l| l.qty_remaining)
        .sum();
    assert_eq!(ledger_sum, item.current_stock);
    assert_eq!(lot_sum, item.current_stock);
    assert!(engine.ledger().verify(item_id).unwrap().ok);
}

#[test]
fn test_fifo_drains_earliest_expiry_first() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(5), Some(date("2025-03-01")));
    receive(&engine, &tomato.id, "L2", dec!(5), Some(date("2025-02-01")));

    let details = engine
        .consume(&tomato.id, dec!(6), None, RefType::Order, "o-1")
        .unwrap();

    assert_eq!(details.len(), 2);
    assert_eq!(details[0].lot_id, Some(lot_key(&tomato.id, "L2")));
    assert_eq!(details[0].qty, dec!(5));
    assert_eq!(details[1].lot_id, Some(lot_key(&tomato.id, "L1")));
    assert_eq!(details[1].qty, dec!(1));

    let entries = engine.ledger().scan(&tomato.id, None).unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[2].qty_delta, dec!(-5));
    assert_eq!(entries[2].lot_number.as_deref(), Some("L2"));
    assert_eq!(entries[2].expiry_date, Some(date("2025-02-01")));
    assert_eq!(engine.get_item(&tomato.id).unwrap().current_stock, dec!(4));
    assert_balanced(&engine, &tomato.id);
}

#[test]
fn test_receipt_then_equal_consumption_nets_to_zero() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::Block);
    receive(&engine, &tomato.id, "L1", dec!(7), None);
    engine
        .consume(&tomato.id, dec!(7), None, RefType::Order, "o-1")
        .unwrap();

    let entries = engine.ledger().scan(&tomato.id, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries.iter().map(|e| e.qty_delta).sum::<Decimal>(), Decimal::ZERO);
    assert_eq!(engine.get_item(&tomato.id).unwrap().current_stock, Decimal::ZERO);
}

#[test]
fn test_same_supplier_lot_number_on_two_items() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::Block);
    let basil = item(&engine, StockPolicy::Block);
    receive(&engine, &tomato.id, "L1", dec!(5), None);
    receive(&engine, &basil.id, "L1", dec!(3), None);

    let tomato_lots = engine.lots(&tomato.id).unwrap();
    let basil_lots = engine.lots(&basil.id).unwrap();
    assert_eq!(tomato_lots.len(), 1);
    assert_eq!(basil_lots.len(), 1);
    assert_ne!(tomato_lots[0].id, basil_lots[0].id);
    assert_eq!(basil_lots[0].lot_number.as_deref(), Some("L1"));
    assert_eq!(basil_lots[0].qty_remaining, dec!(3));

    // Still one lot number per item
    let err = engine
        .run::<_, StockError, _>(&[basil.id.clone()], |batch| {
            batch.receive(&basil.id, dec!(1), 25, Some("L1".into()), None, RefType::PurchaseOrder, "po-2")
        })
        .unwrap_err();
    assert!(matches!(err, StockError::DuplicateLot(ref n) if n == "L1"));

    engine
        .consume(&basil.id, dec!(2), None, RefType::Order, "o-1")
        .unwrap();
    let entries = engine.ledger().scan(&basil.id, None).unwrap();
    assert_eq!(entries[1].lot_number.as_deref(), Some("L1"));
    assert_eq!(engine.lots(&tomato.id).unwrap()[0].qty_remaining, dec!(5));
    assert_balanced(&engine, &tomato.id);
    assert_balanced(&engine, &basil.id);
}

#[test]
fn test_stale_projection_is_resynced_and_retried() {
    use crate::db::tables::ITEMS;
    use crate::db::{get_doc, put_doc};

    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(10), None);

    // Roll the cached projection back behind the ledger head
    let txn = engine.storage().begin_write().unwrap();
    {
        let mut table = txn.open_table(ITEMS).unwrap();
        let mut stale: Item = get_doc(&table, tomato.id.as_str()).unwrap().unwrap();
        stale.last_seq = 0;
        stale.current_stock = Decimal::ZERO;
        put_doc(&mut table, &tomato.id, &stale).unwrap();
    }
    txn.commit().unwrap();

    let details = engine
        .consume(&tomato.id, dec!(4), None, RefType::Order, "o-1")
        .unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].seq, 2);

    let item = engine.get_item(&tomato.id).unwrap();
    assert_eq!(item.last_seq, 2);
    assert_eq!(item.current_stock, dec!(6));
    let seqs: Vec<u64> = engine.ledger().scan(&tomato.id, None).unwrap().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_balanced(&engine, &tomato.id);
}

#[test]
fn test_block_policy_refuses_without_entries() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::Block);
    receive(&engine, &tomato.id, "L1", dec!(3), None);

    let err = engine
        .consume(&tomato.id, dec!(4), None, RefType::Order, "o-1")
        .unwrap_err();
    assert!(matches!(err, StockError::InsufficientStock { .. }));

    assert_eq!(engine.ledger().scan(&tomato.id, None).unwrap().len(), 1);
    let lots = engine.lots(&tomato.id).unwrap();
    assert_eq!(lots[0].qty_remaining, dec!(3));
}

#[test]
fn test_allow_negative_writes_one_unbacked_entry() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(3), None);

    let details = engine
        .consume(&tomato.id, dec!(5), None, RefType::Order, "o-1")
        .unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[1].lot_id, None);
    assert_eq!(details[1].qty, dec!(2));

    let entries = engine.ledger().scan(&tomato.id, None).unwrap();
    let unbacked: Vec<_> = entries.iter().filter(|e| e.lot_number.is_none()).collect();
    assert_eq!(unbacked.len(), 1);
    assert_eq!(unbacked[0].qty_delta, dec!(-2));

    assert_eq!(engine.get_item(&tomato.id).unwrap().current_stock, dec!(-2));
    assert_balanced(&engine, &tomato.id);
}

#[test]
fn test_unit_conversion_and_mismatch() {
    let engine = engine();
    let flour = engine
        .create_item(ItemCreate {
            venue_id: "v1".into(),
            name: "Flour".into(),
            base_unit: Unit::Kg,
            reorder_point: Decimal::ZERO,
            reorder_qty: Decimal::ZERO,
            cost: 120,
            stock_policy: None,
            auto_reorder: false,
        })
        .unwrap();
    receive(&engine, &flour.id, "F1", dec!(2), None);

    engine
        .consume(&flour.id, dec!(500), Some(Unit::G), RefType::Order, "o-1")
        .unwrap();
    assert_eq!(engine.get_item(&flour.id).unwrap().current_stock, dec!(1.5));

    let err = engine
        .consume(&flour.id, dec!(1), Some(Unit::L), RefType::Order, "o-2")
        .unwrap_err();
    assert!(matches!(err, StockError::UnitMismatch { .. }));
}

#[test]
fn test_count_adjusts_only_variances() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    let basil = engine
        .create_item(ItemCreate {
            venue_id: "v1".into(),
            name: "Basil".into(),
            base_unit: Unit::G,
            reorder_point: Decimal::ZERO,
            reorder_qty: Decimal::ZERO,
            cost: 2,
            stock_policy: None,
            auto_reorder: false,
        })
        .unwrap();
    receive(&engine, &tomato.id, "L1", dec!(10), None);
    receive(&engine, &basil.id, "B1", dec!(100), None);

    let count = engine.start_count("v1", "u1").unwrap();
    assert!(count.display_id.starts_with("SC-"));
    engine
        .submit_count_line(&count.id, CountLineInput { item_id: tomato.id.clone(), counted_qty: dec!(8) })
        .unwrap();
    let count = engine
        .submit_count_line(&count.id, CountLineInput { item_id: basil.id.clone(), counted_qty: dec!(100) })
        .unwrap();
    assert_eq!(count.lines[0].variance, dec!(-2));
    assert_eq!(count.lines[1].variance, Decimal::ZERO);

    let done = engine.complete_count(&count.id).unwrap();
    assert_eq!(done.status, StockCountStatus::Completed);
    assert_eq!(done.adjustments, 1);

    let entries = engine.ledger().scan(&tomato.id, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].reason, LedgerReason::StockAdjustment);
    assert_eq!(entries[1].ref_type, RefType::Count);
    assert_eq!(entries[1].qty_delta, dec!(-2));
    assert_eq!(engine.ledger().scan(&basil.id, None).unwrap().len(), 1);
    assert_balanced(&engine, &tomato.id);

    let err = engine
        .submit_count_line(&count.id, CountLineInput { item_id: basil.id, counted_qty: dec!(1) })
        .unwrap_err();
    assert!(matches!(err, StockError::StockCountClosed(_)));
}

#[test]
fn test_waste_is_tagged_and_listed() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(10), None);

    let record = engine
        .log_waste(
            WasteCreate {
                item_id: tomato.id.clone(),
                qty: dec!(3),
                reason_code: "SPOILED".into(),
                notes: None,
            },
            "u1",
        )
        .unwrap();
    assert_eq!(record.details.len(), 1);

    let last = engine.ledger().tail(&tomato.id, 1).unwrap();
    assert_eq!(last[0].reason, LedgerReason::Waste);
    assert_eq!(last[0].ref_type, RefType::Waste);
    assert_eq!(last[0].ref_id, record.id);

    let listed = engine.list_waste("v1", 10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, record.id);
}

#[test]
fn test_reverse_credits_original_lots() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(4), None);
    engine
        .consume(&tomato.id, dec!(6), None, RefType::Order, "o-1")
        .unwrap();

    let credits = engine
        .run::<_, StockError, _>(&[tomato.id.clone()], |batch| {
            batch.reverse(RefType::Order, "o-1")
        })
        .unwrap();
    assert_eq!(credits.len(), 2);
    assert!(credits.iter().all(|e| e.reason == LedgerReason::Receipt));
    assert!(credits.iter().all(|e| e.ref_type == RefType::Void));

    assert_eq!(engine.get_item(&tomato.id).unwrap().current_stock, dec!(4));
    let l1 = engine.lots(&tomato.id).unwrap().into_iter().find(|l| l.lot_number.as_deref() == Some("L1")).unwrap();
    assert_eq!(l1.qty_remaining, dec!(4));
    assert_balanced(&engine, &tomato.id);
}

#[test]
fn test_low_stock_goes_to_outbox_once_per_operation() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(3), None);
    receive(&engine, &tomato.id, "L2", dec!(3), None);

    // 6 -> 1 across two lots: one event, not two
    engine
        .consume(&tomato.id, dec!(5), None, RefType::Order, "o-1")
        .unwrap();

    let events = outbox::pending(engine.storage(), 10).unwrap();
    assert_eq!(events.len(), 1);
    let shared::models::OutboxPayload::LowStock(event) = &events[0].payload;
    assert_eq!(event.item_id, tomato.id);
    assert_eq!(event.current_stock, dec!(1));
    assert!(engine.snapshot(&tomato.id).unwrap().reorder_needed);
}

#[test]
fn test_failed_operation_leaves_lots_untouched() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(5), None);

    let result = engine.run::<(), StockError, _>(&[tomato.id.clone()], |batch| {
        batch.consume(&tomato.id, dec!(2), Unit::Each, LedgerReason::Consumption, RefType::Order, "o-1")?;
        Err(StockError::InvalidQuantity("abort".into()))
    });
    assert!(result.is_err());

    assert_eq!(engine.lots(&tomato.id).unwrap()[0].qty_remaining, dec!(5));
    assert_eq!(engine.ledger().scan(&tomato.id, None).unwrap().len(), 1);
    assert!(outbox::pending(engine.storage(), 10).unwrap().is_empty());
}

#[test]
fn test_purchase_order_lifecycle() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    let supplier = engine
        .create_supplier(SupplierCreate {
            venue_id: "v1".into(),
            name: "Farm Co".into(),
            email: None,
            phone: None,
        })
        .unwrap();
    let po = engine
        .create_purchase_order(
            PurchaseOrderCreate {
                venue_id: "v1".into(),
                supplier_id: supplier.id,
                lines: vec![PurchaseOrderLineInput {
                    item_id: tomato.id.clone(),
                    qty: dec!(10),
                    unit_cost: 25,
                }],
            },
            "u1",
        )
        .unwrap();
    assert_eq!(po.status, PurchaseOrderStatus::Draft);

    let line = |qty: Decimal, lot: &str| ReceivePurchaseOrder {
        lines: vec![ReceiveLine {
            item_id: tomato.id.clone(),
            qty_received: qty,
            lot_number: Some(lot.into()),
            expiry_date: None,
            unit_cost: None,
        }],
    };

    let err = engine.receive_purchase_order(&po.id, line(dec!(4), "P1")).unwrap_err();
    assert!(matches!(err, StockError::PurchaseOrderState(_)));

    engine.approve_purchase_order(&po.id).unwrap();
    let (po_after, lots) = engine.receive_purchase_order(&po.id, line(dec!(4), "P1")).unwrap();
    assert_eq!(po_after.status, PurchaseOrderStatus::PartiallyReceived);
    assert_eq!(lots[0].qty_remaining, dec!(4));

    let err = engine.receive_purchase_order(&po.id, line(dec!(7), "P2")).unwrap_err();
    assert!(matches!(err, StockError::OverReceipt(_)));

    let (po_after, _) = engine.receive_purchase_order(&po.id, line(dec!(6), "P2")).unwrap();
    assert_eq!(po_after.status, PurchaseOrderStatus::Received);

    let entries = engine.ledger().scan(&tomato.id, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.ref_type == RefType::PurchaseOrder && e.ref_id == po.id));
    assert_balanced(&engine, &tomato.id);
}

#[test]
fn test_archived_item_rejects_receipts() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    engine.archive_item(&tomato.id).unwrap();

    let err = engine
        .run::<_, StockError, _>(&[tomato.id.clone()], |batch| {
            batch.receive(&tomato.id, dec!(1), 1, None, None, RefType::PurchaseOrder, "po")
        })
        .unwrap_err();
    assert!(matches!(err, StockError::ItemArchived(_)));
    assert!(engine.list_items("v1", false).unwrap().is_empty());
    assert_eq!(engine.list_items("v1", true).unwrap().len(), 1);
}

struct FlakySink {
    fail: std::sync::atomic::AtomicBool,
    seen: parking_lot::Mutex<Vec<u64>>,
}

#[async_trait::async_trait]
impl outbox::ProcurementSink for FlakySink {
    async fn deliver(&self, event: &shared::models::OutboxEvent) -> Result<(), String> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err("procurement offline".into());
        }
        self.seen.lock().push(event.seq);
        Ok(())
    }
}

#[tokio::test]
async fn test_outbox_worker_retries_until_delivered() {
    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    receive(&engine, &tomato.id, "L1", dec!(3), None);
    engine
        .consume(&tomato.id, dec!(2), None, RefType::Order, "o-1")
        .unwrap();

    let sink = std::sync::Arc::new(FlakySink {
        fail: std::sync::atomic::AtomicBool::new(true),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    struct Shared(std::sync::Arc<FlakySink>);
    #[async_trait::async_trait]
    impl outbox::ProcurementSink for Shared {
        async fn deliver(&self, event: &shared::models::OutboxEvent) -> Result<(), String> {
            self.0.deliver(event).await
        }
    }

    let worker = outbox::OutboxWorker::new(
        engine.storage().clone(),
        Box::new(Shared(sink.clone())),
        std::time::Duration::from_millis(10),
        tokio_util::sync::CancellationToken::new(),
    );

    assert_eq!(worker.drain_once().await.unwrap(), 0);
    let pending = outbox::pending(engine.storage(), 10).unwrap();
    assert_eq!(pending[0].attempts, 1);

    sink.fail.store(false, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(worker.drain_once().await.unwrap(), 1);
    assert!(outbox::pending(engine.storage(), 10).unwrap().is_empty());
    assert_eq!(sink.seen.lock().len(), 1);
}

#[tokio::test]
async fn test_outbox_drops_delivered_rows() {
    use redb::ReadableTableMetadata;

    let engine = engine();
    let tomato = item(&engine, StockPolicy::AllowNegative);
    // Each consumption below the reorder point queues its own event
    for i in 0..3 {
        engine
            .consume(&tomato.id, dec!(1), None, RefType::Order, &format!("o-{i}"))
            .unwrap();
    }
    assert_eq!(outbox::pending(engine.storage(), 10).unwrap().len(), 3);
    assert_eq!(outbox::pending(engine.storage(), 2).unwrap().len(), 2);

    let sink = std::sync::Arc::new(FlakySink {
        fail: std::sync::atomic::AtomicBool::new(false),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    struct Shared(std::sync::Arc<FlakySink>);
    #[async_trait::async_trait]
    impl outbox::ProcurementSink for Shared {
        async fn deliver(&self, event: &shared::models::OutboxEvent) -> Result<(), String> {
            self.0.deliver(event).await
        }
    }
    let worker = outbox::OutboxWorker::new(
        engine.storage().clone(),
        Box::new(Shared(sink.clone())),
        std::time::Duration::from_millis(10),
        tokio_util::sync::CancellationToken::new(),
    );
    assert_eq!(worker.drain_once().await.unwrap(), 3);

    let seen = sink.seen.lock().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));

    let read = engine.storage().begin_read().unwrap();
    let table = read.open_table(crate::db::tables::OUTBOX).unwrap();
    assert_eq!(table.len().unwrap(), 0);
    assert_eq!(worker.drain_once().await.unwrap(), 0);
}
