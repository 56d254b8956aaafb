use super::*;
use rust_decimal_macros::dec;
use shared::models::{
    AddPayment, ItemCreate, MenuItemCreate, PrepArea, RecipeComponent, RecipeCreate, StockPolicy,
    TenderType, TicketStatus,
};

use crate::kds::KdsRouter;
use crate::ledger::ItemLocks;
use crate::recipes::RecipeBook;
use crate::tender::TenderEngine;

struct Pos {
    stock: StockEngine,
    recipes: RecipeBook,
    orders: OrderService,
    tender: TenderEngine,
    kds: KdsRouter,
}

fn pos() -> Pos {
    let storage = Storage::open_in_memory().unwrap();
    let stock = StockEngine::new(storage.clone(), ItemLocks::new());
    Pos {
        recipes: RecipeBook::new(storage.clone()),
        orders: OrderService::new(storage.clone(), stock.clone()),
        tender: TenderEngine::new(storage.clone()),
        kds: KdsRouter::new(storage, 30),
        stock,
    }
}

/// Stock item with 100 units in lot L1 and a menu item drawing 2 of it
fn burger(p: &Pos, policy: StockPolicy, on_hand: Decimal) -> (String, MenuItem) {
    let patty = p
        .stock
        .create_item(ItemCreate {
            venue_id: "v1".into(),
            name: "Patty".into(),
            base_unit: Unit::Each,
            reorder_point: Decimal::ZERO,
            reorder_qty: Decimal::ZERO,
            cost: 10,
            stock_policy: Some(policy),
            auto_reorder: false,
        })
        .unwrap();
    if on_hand > Decimal::ZERO {
        p.stock
            .run::<_, StockError, _>(&[patty.id.clone()], |batch| {
                batch.receive(&patty.id, on_hand, 10, Some("L1".into()), None, RefType::PurchaseOrder, "po-1")
            })
            .unwrap();
    }
    p.recipes
        .save_recipe(RecipeCreate {
            id: Some("double".into()),
            venue_id: "v1".into(),
            name: "Double".into(),
            yield_qty: dec!(1),
            components: vec![RecipeComponent::Ingredient {
                item_id: patty.id.clone(),
                qty: dec!(2),
                unit: Unit::Each,
                waste_pct: None,
            }],
        })
        .unwrap();
    let menu = p
        .recipes
        .create_menu_item(MenuItemCreate {
            venue_id: "v1".into(),
            name: "Double burger".into(),
            price: 1250,
            tax_rate_bps: 1800,
            prep_area: PrepArea::Grill,
            recipe_id: Some("double".into()),
        })
        .unwrap();
    (patty.id, menu)
}

fn drink(p: &Pos, price: i64) -> MenuItem {
    p.recipes
        .create_menu_item(MenuItemCreate {
            venue_id: "v1".into(),
            name: "Cola".into(),
            price,
            tax_rate_bps: 0,
            prep_area: PrepArea::Bar,
            recipe_id: None,
        })
        .unwrap()
}

fn new_order(p: &Pos, discount: i64) -> Order {
    let session = p.orders.open_session("v1", "waiter").unwrap();
    p.orders
        .create_order(
            CreateOrder {
                session_id: session.id,
                table_id: Some("t1".into()),
                discount,
            },
            "waiter",
        )
        .unwrap()
}

fn add(p: &Pos, order_id: &str, menu_item_id: &str, qty: u32) -> Order {
    p.orders
        .add_item(
            order_id,
            AddItem {
                menu_item_id: menu_item_id.into(),
                qty,
                seat_no: None,
                course_no: None,
                instructions: None,
            },
        )
        .unwrap()
}

fn cash(amount: i64, key: &str) -> AddPayment {
    AddPayment {
        tender_type: TenderType::Cash,
        amount,
        tip_amount: 0,
        seat_refs: Vec::new(),
        idempotency_key: key.into(),
    }
}

#[test]
fn test_send_consumes_stock_and_routes_ticket() {
    let p = pos();
    let (patty, menu) = burger(&p, StockPolicy::AllowNegative, dec!(100));
    let order = new_order(&p, 0);
    assert_eq!(order.display_id, "ORD-000001");
    add(&p, &order.id, &menu.id, 3);

    let sent = p.orders.send(&order.id).unwrap();
    assert_eq!(sent.status, OrderStatus::Sent);

    let entries = p.stock.ledger().scan(&patty, None).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].reason, LedgerReason::Consumption);
    assert_eq!(entries[1].qty_delta, dec!(-6));
    assert_eq!(entries[1].lot_number.as_deref(), Some("L1"));
    assert_eq!(p.stock.get_item(&patty).unwrap().current_stock, dec!(94));

    let tickets = p.kds.tickets_for_order(&order.id).unwrap();
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].prep_area, PrepArea::Grill);
    let item = &sent.items[0];
    assert_eq!(item.ticket_id.as_deref(), Some(tickets[0].id.as_str()));
    assert!(item.sent_at.unwrap() <= tickets[0].created_at);
}

#[test]
fn test_items_added_after_send_get_a_new_ticket() {
    let p = pos();
    let (_, menu) = burger(&p, StockPolicy::AllowNegative, dec!(100));
    let cola = drink(&p, 300);
    let order = new_order(&p, 0);
    add(&p, &order.id, &menu.id, 1);
    p.orders.send(&order.id).unwrap();

    add(&p, &order.id, &menu.id, 1);
    add(&p, &order.id, &cola.id, 2);
    let sent = p.orders.send(&order.id).unwrap();
    assert_eq!(sent.status, OrderStatus::Sent);
    assert_eq!(p.kds.tickets_for_order(&order.id).unwrap().len(), 3);
    assert!(sent.items.iter().all(|i| i.sent_at.is_some()));

    let err = p.orders.send(&order.id).unwrap_err();
    assert!(matches!(err, OrderError::Empty(_)));
}

#[test]
fn test_totals_use_snapshot_tax_and_discount() {
    let p = pos();
    let (_, menu) = burger(&p, StockPolicy::AllowNegative, dec!(10));
    let cola = drink(&p, 300);
    let order = new_order(&p, 100);
    add(&p, &order.id, &menu.id, 2);
    let order = add(&p, &order.id, &cola.id, 1);

    // 2 × 1250 + 300; tax 18% of 2500
    assert_eq!(order.totals.subtotal, 2800);
    assert_eq!(order.totals.tax, 450);
    assert_eq!(order.totals.discount, 100);
    assert_eq!(order.totals.grand_total, 3150);
    assert_eq!(order.totals.balance, 3150);
}

#[test]
fn test_overflowing_line_is_rejected_and_order_unchanged() {
    let p = pos();
    let magnum = drink(&p, i64::MAX / 2);
    let order = new_order(&p, 0);
    add(&p, &order.id, &magnum.id, 1);

    let err = p
        .orders
        .add_item(
            &order.id,
            AddItem {
                menu_item_id: magnum.id.clone(),
                qty: 3,
                seat_no: None,
                course_no: None,
                instructions: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, OrderError::AmountOutOfRange(_)));
    assert_eq!(AppError::from(err).code, ErrorCode::ValidationFailed);

    let order = p.orders.get_order(&order.id).unwrap();
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.totals.subtotal, i64::MAX / 2);
}

#[test]
fn test_menu_price_is_bounded() {
    use validator::Validate;

    let mut input = MenuItemCreate {
        venue_id: "v1".into(),
        name: "Cola".into(),
        price: 100_000_000,
        tax_rate_bps: 0,
        prep_area: PrepArea::Bar,
        recipe_id: None,
    };
    assert!(input.validate().is_ok());
    input.price = i64::MAX;
    assert!(input.validate().is_err());
}

#[test]
fn test_menu_added_after_session_open_is_not_orderable() {
    let p = pos();
    let order = new_order(&p, 0);
    let late = drink(&p, 300);
    let err = p
        .orders
        .add_item(
            &order.id,
            AddItem {
                menu_item_id: late.id,
                qty: 1,
                seat_no: None,
                course_no: None,
                instructions: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, OrderError::NotOnMenu(_)));
}

#[test]
fn test_remove_only_unsent_items() {
    let p = pos();
    let cola = drink(&p, 300);
    let order = new_order(&p, 0);
    let order = add(&p, &order.id, &cola.id, 1);
    let sent_item = order.items[0].id.clone();
    p.orders.send(&order.id).unwrap();

    let order = add(&p, &order.id, &cola.id, 1);
    let unsent_item = order.items[1].id.clone();

    let err = p.orders.remove_item(&order.id, &sent_item).unwrap_err();
    assert!(matches!(err, OrderError::ItemSent(_)));
    let order = p.orders.remove_item(&order.id, &unsent_item).unwrap();
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.totals.grand_total, 300);
}

#[test]
fn test_blocked_stock_rejects_whole_send() {
    let p = pos();
    let (patty, menu) = burger(&p, StockPolicy::Block, dec!(3));
    let cola = drink(&p, 300);
    let order = new_order(&p, 0);
    add(&p, &order.id, &menu.id, 2);
    add(&p, &order.id, &cola.id, 1);

    let err = p.orders.send(&order.id).unwrap_err();
    assert!(matches!(
        err,
        OrderError::Stock(StockError::InsufficientStock { .. })
    ));
    assert_eq!(p.stock.ledger().scan(&patty, None).unwrap().len(), 1);
    assert!(p.kds.tickets_for_order(&order.id).unwrap().is_empty());
    let order = p.orders.get_order(&order.id).unwrap();
    assert_eq!(order.status, OrderStatus::Open);
    assert!(order.items.iter().all(|i| i.sent_at.is_none()));
}

#[test]
fn test_void_reverses_stock_and_withdraws_tickets() {
    let p = pos();
    let (patty, menu) = burger(&p, StockPolicy::AllowNegative, dec!(100));
    let order = new_order(&p, 0);
    add(&p, &order.id, &menu.id, 3);
    p.orders.send(&order.id).unwrap();

    let voided = p
        .orders
        .void(&order.id, VoidOrder { reason: Some("guest left".into()) }, "manager")
        .unwrap();
    assert_eq!(voided.status, OrderStatus::Voided);

    let entries = p.stock.ledger().scan(&patty, None).unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2].reason, LedgerReason::Receipt);
    assert_eq!(entries[2].ref_type, RefType::Void);
    assert_eq!(entries[2].qty_delta, dec!(6));
    assert_eq!(p.stock.get_item(&patty).unwrap().current_stock, dec!(100));

    let tickets = p.kds.tickets_for_order(&order.id).unwrap();
    assert_eq!(tickets[0].status, TicketStatus::Withdrawn);

    let err = p.orders.void(&order.id, VoidOrder::default(), "manager").unwrap_err();
    assert!(matches!(err, OrderError::InvalidState { .. }));
}

#[test]
fn test_void_refused_while_payments_stand() {
    let p = pos();
    let cola = drink(&p, 1000);
    let order = new_order(&p, 0);
    add(&p, &order.id, &cola.id, 1);
    p.orders.send(&order.id).unwrap();
    let (payment, order) = p.tender.add_payment(&order.id, cash(400, "K1"), "waiter").unwrap();
    assert_eq!(order.status, OrderStatus::Partial);

    let err = p.orders.void(&order.id, VoidOrder::default(), "manager").unwrap_err();
    assert!(matches!(err, OrderError::HasPayments(_)));
    let err = p.orders.close(&order.id).unwrap_err();
    assert!(matches!(err, OrderError::NotSettled(_)));

    let (_, order) = p.tender.void_payment(&payment.id).unwrap();
    assert_eq!(order.status, OrderStatus::Sent);
    let order = p.orders.void(&order.id, VoidOrder::default(), "manager").unwrap();
    assert_eq!(order.status, OrderStatus::Voided);
}

#[test]
fn test_close_after_full_payment() {
    let p = pos();
    let cola = drink(&p, 1000);
    let order = new_order(&p, 0);
    add(&p, &order.id, &cola.id, 1);
    p.orders.send(&order.id).unwrap();
    let (_, order) = p.tender.add_payment(&order.id, cash(1000, "K1"), "waiter").unwrap();
    assert_eq!(order.status, OrderStatus::Paid);

    let err = p.orders.add_item(
        &order.id,
        AddItem {
            menu_item_id: cola.id.clone(),
            qty: 1,
            seat_no: None,
            course_no: None,
            instructions: None,
        },
    );
    assert!(matches!(err, Err(OrderError::InvalidState { .. })));

    let closed = p.orders.close(&order.id).unwrap();
    assert_eq!(closed.status, OrderStatus::Closed);
    assert!(closed.closed_at.is_some());
}
