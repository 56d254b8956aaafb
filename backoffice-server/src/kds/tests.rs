use super::*;
use chrono::TimeZone;
use shared::models::{Order, OrderItem, OrderPaymentStatus, OrderStatus, OrderTotals};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap()
}

fn secs(n: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(n)
}

fn order_item(id: &str, area: PrepArea) -> OrderItem {
    OrderItem {
        id: id.into(),
        menu_item_id: format!("m-{id}"),
        name: id.into(),
        qty: 1,
        unit_price: 1000,
        tax_rate_bps: 0,
        prep_area: area,
        seat_no: None,
        course_no: None,
        instructions: None,
        sent_at: None,
        ticket_id: None,
    }
}

fn order(items: Vec<OrderItem>) -> Order {
    Order {
        id: "o-1".into(),
        display_id: "ORD-000001".into(),
        venue_id: "v1".into(),
        table_id: None,
        session_id: "s-1".into(),
        server_id: "waiter".into(),
        status: OrderStatus::Open,
        items,
        totals: OrderTotals::default(),
        payment_status: OrderPaymentStatus::Unpaid,
        created_at: t0(),
        updated_at: t0(),
        closed_at: None,
        voided_at: None,
        void_reason: None,
    }
}

fn route(router: &KdsRouter, order: &Order) -> Vec<Ticket> {
    let txn = router.storage.begin_write().unwrap();
    let batch: Vec<&OrderItem> = order.items.iter().collect();
    let tickets = create_tickets(&txn, order, &batch, t0()).unwrap();
    txn.commit().unwrap();
    tickets
}

fn router() -> KdsRouter {
    KdsRouter::new(Storage::open_in_memory().unwrap(), 30)
}

fn bump_to(target: TicketStatus) -> BumpTicket {
    BumpTicket { target, op_id: None }
}

#[test]
fn test_groups_items_by_prep_area() {
    let router = router();
    let o = order(vec![
        order_item("burger", PrepArea::Grill),
        order_item("steak", PrepArea::Grill),
        order_item("beer", PrepArea::Bar),
    ]);
    let tickets = route(&router, &o);
    assert_eq!(tickets.len(), 2);

    let grill = tickets.iter().find(|t| t.prep_area == PrepArea::Grill).unwrap();
    assert_eq!(grill.station_key, "GRILL");
    assert_eq!(grill.items.len(), 2);
    assert_eq!(grill.state_history.len(), 1);
    assert_eq!(grill.state_history[0].from, None);

    assert_eq!(router.tickets_for_order("o-1").unwrap().len(), 2);
    let boot = router.bootstrap("v1", "GRILL").unwrap();
    assert_eq!(boot.tickets.len(), 1);
    assert_eq!(boot.station.undo_window_seconds, 30);
}

#[test]
fn test_bump_is_single_step() {
    let router = router();
    let tickets = route(&router, &order(vec![order_item("burger", PrepArea::Grill)]));
    let id = &tickets[0].id;

    let err = router
        .bump(id, &bump_to(TicketStatus::Ready), "cook", secs(1))
        .unwrap_err();
    assert!(matches!(err, KdsError::Transition { .. }));

    for (i, target) in [TicketStatus::Preparing, TicketStatus::Ready, TicketStatus::Completed]
        .into_iter()
        .enumerate()
    {
        let t = router.bump(id, &bump_to(target), "cook", secs(i as i64 + 1)).unwrap();
        assert_eq!(t.status, target);
    }
    let err = router
        .bump(id, &bump_to(TicketStatus::Completed), "cook", secs(9))
        .unwrap_err();
    assert!(matches!(err, KdsError::Transition { .. }));
    assert!(router.bootstrap("v1", "GRILL").unwrap().tickets.is_empty());
}

#[test]
fn test_bump_then_undo_within_window() {
    let router = router();
    let tickets = route(&router, &order(vec![order_item("burger", PrepArea::Grill)]));
    let id = &tickets[0].id;

    router.bump(id, &bump_to(TicketStatus::Preparing), "cook", secs(5)).unwrap();
    let t = router.undo(id, &UndoTicket::default(), "cook", secs(10)).unwrap();
    assert_eq!(t.status, TicketStatus::New);
    assert_eq!(t.state_history.len(), 3);
    assert!(t.state_history[2].undo);

    let err = router
        .undo(id, &UndoTicket::default(), "cook", secs(50))
        .unwrap_err();
    assert!(matches!(err, KdsError::UndoExpired { .. }));
}

#[test]
fn test_undo_completed_respects_window() {
    let router = router();
    let tickets = route(&router, &order(vec![order_item("salad", PrepArea::Cold)]));
    let id = &tickets[0].id;
    router.bump(id, &bump_to(TicketStatus::Preparing), "cook", secs(1)).unwrap();
    router.bump(id, &bump_to(TicketStatus::Ready), "cook", secs(2)).unwrap();
    let done = router.bump(id, &bump_to(TicketStatus::Completed), "cook", secs(3)).unwrap();
    assert_eq!(done.completed_at(), Some(secs(3)));

    let err = router
        .undo(id, &UndoTicket::default(), "cook", secs(34))
        .unwrap_err();
    assert!(matches!(err, KdsError::UndoExpired { .. }));

    let back = router.undo(id, &UndoTicket::default(), "cook", secs(33)).unwrap();
    assert_eq!(back.status, TicketStatus::Ready);
}

#[test]
fn test_nothing_to_undo_on_new_ticket() {
    let router = router();
    let tickets = route(&router, &order(vec![order_item("fries", PrepArea::Fry)]));
    let err = router
        .undo(&tickets[0].id, &UndoTicket::default(), "cook", secs(1))
        .unwrap_err();
    assert!(matches!(err, KdsError::NothingToUndo(_)));
}

#[test]
fn test_station_window_overrides_default() {
    let router = router();
    router
        .upsert_station(
            "hot",
            StationUpsert {
                venue_id: "v1".into(),
                name: "Hot line".into(),
                prep_areas: vec![PrepArea::Grill, PrepArea::Fry],
                undo_window_seconds: Some(120),
            },
        )
        .unwrap();
    let tickets = route(
        &router,
        &order(vec![order_item("burger", PrepArea::Grill), order_item("fries", PrepArea::Fry)]),
    );
    assert_eq!(router.bootstrap("v1", "hot").unwrap().tickets.len(), 2);

    // Ticket station_key is its prep area; the GRILL station is still implicit
    let id = &tickets[0].id;
    router.bump(id, &bump_to(TicketStatus::Preparing), "cook", secs(1)).unwrap();
    assert!(router.undo(id, &UndoTicket::default(), "cook", secs(40)).is_err());

    assert!(matches!(router.station("v1", "pastry"), Err(KdsError::StationNotFound(_))));
    let stations = router.list_stations("v1").unwrap();
    assert_eq!(stations.len(), 1 + PrepArea::ALL.len());
}

#[test]
fn test_op_id_replay_returns_current_state() {
    let router = router();
    let tickets = route(&router, &order(vec![order_item("burger", PrepArea::Grill)]));
    let id = &tickets[0].id;
    let input = BumpTicket {
        target: TicketStatus::Preparing,
        op_id: Some("op-1".into()),
    };

    let first = router.bump(id, &input, "cook", secs(1)).unwrap();
    let again = router.bump(id, &input, "cook", secs(2)).unwrap();
    assert_eq!(first, again);
    assert_eq!(again.state_history.len(), 2);
}

#[test]
fn test_withdraw_and_stats() {
    let router = router();
    let o = order(vec![order_item("burger", PrepArea::Grill)]);
    let tickets = route(&router, &o);
    let id = &tickets[0].id;
    router.bump(id, &bump_to(TicketStatus::Preparing), "cook", secs(10)).unwrap();
    router.bump(id, &bump_to(TicketStatus::Ready), "cook", secs(70)).unwrap();
    router.bump(id, &bump_to(TicketStatus::Completed), "cook", secs(80)).unwrap();

    let stats = router.stats("v1", "GRILL").unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.avg_prep_seconds, Some(60.0));

    let mut second = o.clone();
    second.id = "o-2".into();
    let open = route(&router, &second);
    let txn = router.storage.begin_write().unwrap();
    let withdrawn = withdraw_for_order(&txn, "o-2", "manager", secs(90)).unwrap();
    txn.commit().unwrap();
    assert_eq!(withdrawn.len(), 1);
    assert_eq!(router.get_ticket(&open[0].id).unwrap().status, TicketStatus::Withdrawn);
    assert!(router.bootstrap("v1", "GRILL").unwrap().tickets.is_empty());
}
