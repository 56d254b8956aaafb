use super::*;
use shared::models::{
    AddItem, AddPayment, CreateOrder, MenuItemCreate, PrepArea, SeatPayment,
};

use crate::ledger::ItemLocks;
use crate::orders::OrderService;
use crate::recipes::RecipeBook;
use crate::stock::StockEngine;

struct Till {
    orders: OrderService,
    tender: TenderEngine,
}

/// A sent order whose grand total is `total`
fn sent_order(total: i64) -> (Till, Order) {
    let storage = Storage::open_in_memory().unwrap();
    let recipes = RecipeBook::new(storage.clone());
    let stock = StockEngine::new(storage.clone(), ItemLocks::new());
    let till = Till {
        orders: OrderService::new(storage.clone(), stock),
        tender: TenderEngine::new(storage),
    };
    let menu = recipes
        .create_menu_item(MenuItemCreate {
            venue_id: "v1".into(),
            name: "Tasting menu".into(),
            price: total,
            tax_rate_bps: 0,
            prep_area: PrepArea::Kitchen,
            recipe_id: None,
        })
        .unwrap();
    let session = till.orders.open_session("v1", "waiter").unwrap();
    let order = till
        .orders
        .create_order(
            CreateOrder {
                session_id: session.id,
                table_id: None,
                discount: 0,
            },
            "waiter",
        )
        .unwrap();
    till.orders
        .add_item(
            &order.id,
            AddItem {
                menu_item_id: menu.id,
                qty: 1,
                seat_no: None,
                course_no: None,
                instructions: None,
            },
        )
        .unwrap();
    let order = till.orders.send(&order.id).unwrap();
    (till, order)
}

fn pay(tender: TenderType, amount: i64, key: &str) -> AddPayment {
    AddPayment {
        tender_type: tender,
        amount,
        tip_amount: 0,
        seat_refs: Vec::new(),
        idempotency_key: key.into(),
    }
}

#[test]
fn test_idempotent_payment() {
    let (till, order) = sent_order(5000);

    let (p1, after) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 5000, "K1"), "waiter")
        .unwrap();
    assert_eq!(p1.status, PaymentStatus::Completed);
    assert_eq!(after.status, OrderStatus::Paid);

    let (again, _) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 5000, "K1"), "waiter")
        .unwrap();
    assert_eq!(again, p1);
    assert_eq!(till.tender.list_payments(&order.id).unwrap().len(), 1);

    let err = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 6000, "K1"), "waiter")
        .unwrap_err();
    assert!(matches!(err, TenderError::IdempotencyConflict(_)));
}

#[test]
fn test_split_equal_puts_remainder_last() {
    let (till, order) = sent_order(10001);
    let (payments, after) = till
        .tender
        .split_equal(
            &order.id,
            SplitEqual {
                n: 3,
                tender_type: TenderType::Cash,
                idempotency_key: "S1".into(),
            },
            "waiter",
        )
        .unwrap();
    let amounts: Vec<i64> = payments.iter().map(|p| p.amount).collect();
    assert_eq!(amounts, vec![3333, 3333, 3335]);
    assert!(payments.iter().all(|p| p.is_split));
    assert_eq!(after.status, OrderStatus::Paid);
}

#[test]
fn test_split_covers_remaining_balance() {
    let (till, order) = sent_order(10000);
    let (_, after) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 4000, "K1"), "waiter")
        .unwrap();
    assert_eq!(after.status, OrderStatus::Partial);

    let (payments, after) = till
        .tender
        .split_equal(
            &order.id,
            SplitEqual {
                n: 2,
                tender_type: TenderType::Voucher,
                idempotency_key: "S1".into(),
            },
            "waiter",
        )
        .unwrap();
    assert_eq!(payments.iter().map(|p| p.amount).sum::<i64>(), 6000);
    assert_eq!(after.status, OrderStatus::Paid);
    assert_eq!(after.totals.balance, 0);
}

#[test]
fn test_card_payment_waits_for_confirmation() {
    let (till, order) = sent_order(2000);
    let (card, after) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Card, 2000, "C1"), "waiter")
        .unwrap();
    assert_eq!(card.status, PaymentStatus::Pending);
    assert_eq!(after.status, OrderStatus::Sent);

    // Pending amount is reserved
    let err = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 1, "K2"), "waiter")
        .unwrap_err();
    assert!(matches!(err, TenderError::InvalidAmount(_)));

    let (card, after) = till.tender.confirm_payment(&card.id, true).unwrap();
    assert_eq!(card.status, PaymentStatus::Completed);
    assert_eq!(after.status, OrderStatus::Paid);

    let err = till.tender.confirm_payment(&card.id, true).unwrap_err();
    assert!(matches!(err, TenderError::PaymentState { .. }));
}

#[test]
fn test_declined_card_is_voided() {
    let (till, order) = sent_order(2000);
    let (card, _) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Card, 2000, "C1"), "waiter")
        .unwrap();
    let (card, after) = till.tender.confirm_payment(&card.id, false).unwrap();
    assert_eq!(card.status, PaymentStatus::Voided);
    assert_eq!(after.status, OrderStatus::Sent);
}

#[test]
fn test_payment_requires_sent_order() {
    let (till, order) = sent_order(1000);
    let session = till.orders.get_session(&order.session_id).unwrap();
    let open = till
        .orders
        .create_order(
            CreateOrder {
                session_id: session.id,
                table_id: None,
                discount: 0,
            },
            "waiter",
        )
        .unwrap();
    let err = till
        .tender
        .add_payment(&open.id, pay(TenderType::Cash, 100, "K1"), "waiter")
        .unwrap_err();
    assert!(matches!(err, TenderError::OrderState { .. }));
}

#[test]
fn test_split_by_seat() {
    let (till, order) = sent_order(9000);
    let seat = |seats: Vec<u32>, amount| SeatPayment {
        seat_refs: seats,
        tender_type: TenderType::Cash,
        amount,
    };

    let err = till
        .tender
        .split_by_seat(
            &order.id,
            SplitBySeat {
                seat_payments: vec![seat(vec![1, 2], 3000), seat(vec![2], 3000)],
                idempotency_key: "B1".into(),
            },
            "waiter",
        )
        .unwrap_err();
    assert!(matches!(err, TenderError::Split(_)));

    let (payments, after) = till
        .tender
        .split_by_seat(
            &order.id,
            SplitBySeat {
                seat_payments: vec![seat(vec![1, 2], 6000), seat(vec![3], 3000)],
                idempotency_key: "B2".into(),
            },
            "waiter",
        )
        .unwrap();
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0].seat_refs, vec![1, 2]);
    assert_eq!(after.status, OrderStatus::Paid);
}

#[test]
fn test_void_payment_blocked_after_close() {
    let (till, order) = sent_order(1500);
    let (p, _) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 1500, "K1"), "waiter")
        .unwrap();
    till.orders.close(&order.id).unwrap();

    let err = till.tender.void_payment(&p.id).unwrap_err();
    assert!(matches!(err, TenderError::OrderState { .. }));
}

#[test]
fn test_tip_amendment_recorded() {
    let (till, order) = sent_order(1500);
    let (p, _) = till
        .tender
        .add_payment(&order.id, pay(TenderType::Cash, 1500, "K1"), "waiter")
        .unwrap();
    let tip = till
        .tender
        .add_tip(
            &p.id,
            AddTip {
                tip_amount: 200,
                pooled: true,
            },
            "waiter",
        )
        .unwrap();
    assert!(tip.pooled);
    assert_eq!(till.tender.get_payment(&p.id).unwrap().tip_amount, 200);
    // Tips do not count towards settlement
    let order = till.orders.get_order(&order.id).unwrap();
    assert_eq!(order.totals.paid, 1500);
}
