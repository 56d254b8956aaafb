//! Order state machine
//!
//! ```text
//! OPEN ──send──▶ SENT ──payment──▶ PARTIAL ──payment──▶ PAID ──close──▶ CLOSED
//! OPEN|SENT ──void──▶ VOIDED
//! ```
//!
//! Orders are mutated only here; the tender engine reports the completed
//! payment sum through [`settle_order`]. Send and void run inside one stock
//! transaction so lot drains, ledger entries, tickets and the order commit
//! together.

pub mod totals;

use redb::{ReadableTable, WriteTransaction};
use rust_decimal::Decimal;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    AddItem, CreateOrder, LedgerReason, MenuItem, MenuSnapshotEntry, Order, OrderItem,
    OrderPaymentStatus, OrderStatus, OrderTotals, PosSession, RefType, SessionStatus, Unit,
    VoidOrder,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::db::tables::{MENU_BY_VENUE, MENU_ITEMS, ORDERS, POS_SESSIONS};
use crate::db::{Storage, StorageError, get_doc, load_indexed, next_counter, put_doc};
use crate::kds::{self, KdsError};
use crate::recipes::{ReadCatalog, RecipeError};
use crate::stock::{LedgerRetry, StockEngine, StockError};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Recipe(#[from] RecipeError),

    #[error(transparent)]
    Kds(#[from] KdsError),

    #[error("POS session not found: {0}")]
    SessionNotFound(String),

    #[error("POS session is closed: {0}")]
    SessionClosed(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order item not found: {0}")]
    OrderItemNotFound(String),

    #[error("Menu item {0} is not on the session menu")]
    NotOnMenu(String),

    #[error("Cannot {action} order {display_id} in status {status:?}")]
    InvalidState {
        display_id: String,
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Order item {0} was already sent to the kitchen")]
    ItemSent(String),

    #[error("Order {0} has no unsent items")]
    Empty(String),

    #[error("Order {0} has completed payments; void them first")]
    HasPayments(String),

    #[error("Order {0} is not fully paid")]
    NotSettled(String),

    #[error("Order {0} total is out of range")]
    AmountOutOfRange(String),
}

impl From<redb::TableError> for OrderError {
    fn from(e: redb::TableError) -> Self {
        OrderError::Storage(e.into())
    }
}

impl From<redb::StorageError> for OrderError {
    fn from(e: redb::StorageError) -> Self {
        OrderError::Storage(e.into())
    }
}

pub type OrderResult<T> = Result<T, OrderError>;

impl LedgerRetry for OrderError {
    fn conflicting_item(&self) -> Option<String> {
        match self {
            OrderError::Stock(e) => e.conflicting_item(),
            _ => None,
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::Storage(e) => e.into(),
            OrderError::Stock(e) => e.into(),
            OrderError::Recipe(e) => e.into(),
            OrderError::Kds(e) => e.into(),
            OrderError::SessionNotFound(_) => {
                AppError::with_message(ErrorCode::PosSessionNotFound, message)
            }
            OrderError::SessionClosed(_) => {
                AppError::with_message(ErrorCode::PosSessionClosed, message)
            }
            OrderError::OrderNotFound(_) => AppError::with_message(ErrorCode::OrderNotFound, message),
            OrderError::OrderItemNotFound(_) => {
                AppError::with_message(ErrorCode::OrderItemNotFound, message)
            }
            OrderError::NotOnMenu(_) => AppError::with_message(ErrorCode::MenuItemNotFound, message),
            OrderError::InvalidState { .. } => {
                AppError::with_message(ErrorCode::OrderStateInvalid, message)
            }
            OrderError::ItemSent(_) => AppError::with_message(ErrorCode::OrderItemSent, message),
            OrderError::Empty(_) => AppError::with_message(ErrorCode::OrderEmpty, message),
            OrderError::HasPayments(_) => {
                AppError::with_message(ErrorCode::OrderHasPayments, message)
            }
            OrderError::NotSettled(_) => {
                AppError::with_message(ErrorCode::OrderNotSettled, message)
            }
            OrderError::AmountOutOfRange(_) => AppError::validation(message),
        }
    }
}

fn invalid_state(order: &Order, action: &'static str) -> OrderError {
    OrderError::InvalidState {
        display_id: order.display_id.clone(),
        status: order.status,
        action,
    }
}

/// Load an order inside a write transaction
pub(crate) fn load_order(txn: &WriteTransaction, order_id: &str) -> OrderResult<Order> {
    let table = txn.open_table(ORDERS)?;
    get_doc(&table, order_id)?.ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))
}

fn save_order(txn: &WriteTransaction, order: &Order) -> OrderResult<()> {
    let mut table = txn.open_table(ORDERS)?;
    put_doc(&mut table, &order.id, order)?;
    Ok(())
}

/// Record the completed-payment sum on an order
///
/// Called by the tender engine inside its own transaction. Returns the
/// updated order.
pub(crate) fn settle_order(txn: &WriteTransaction, order_id: &str, paid: i64) -> OrderResult<Order> {
    let mut order = load_order(txn, order_id)?;
    let before = order.status;
    totals::settle(&mut order, paid);
    order.updated_at = shared::util::now();
    save_order(txn, &order)?;
    if before != order.status {
        tracing::info!(
            order_id = %order.id,
            from = ?before,
            to = ?order.status,
            paid,
            grand_total = order.totals.grand_total,
            "Order settlement changed"
        );
    }
    Ok(order)
}

#[derive(Clone)]
pub struct OrderService {
    storage: Storage,
    stock: StockEngine,
}

impl OrderService {
    pub fn new(storage: Storage, stock: StockEngine) -> Self {
        Self { storage, stock }
    }

    // ========== Sessions ==========

    /// Open a session with the venue's active menu frozen into it
    pub fn open_session(&self, venue_id: &str, actor: &str) -> OrderResult<PosSession> {
        let txn = self.storage.begin_write()?;
        let session = {
            let index = txn.open_table(MENU_BY_VENUE)?;
            let docs = txn.open_table(MENU_ITEMS)?;
            let menu_items: Vec<MenuItem> = load_indexed(&index, &docs, venue_id)?;
            let menu = menu_items
                .into_iter()
                .filter(|m| m.active)
                .map(|m| {
                    (
                        m.id.clone(),
                        MenuSnapshotEntry {
                            menu_item_id: m.id,
                            name: m.name,
                            price: m.price,
                            tax_rate_bps: m.tax_rate_bps,
                            prep_area: m.prep_area,
                        },
                    )
                })
                .collect();

            let session = PosSession {
                id: shared::util::new_id(),
                venue_id: venue_id.to_string(),
                opened_by: actor.to_string(),
                opened_at: shared::util::now(),
                closed_at: None,
                status: SessionStatus::Open,
                menu,
            };
            let mut table = txn.open_table(POS_SESSIONS)?;
            put_doc(&mut table, &session.id, &session)?;
            session
        };
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(session_id = %session.id, venue_id, menu_items = session.menu.len(), "POS session opened");
        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> OrderResult<PosSession> {
        self.storage
            .get(POS_SESSIONS, session_id)?
            .ok_or_else(|| OrderError::SessionNotFound(session_id.to_string()))
    }

    pub fn close_session(&self, session_id: &str) -> OrderResult<PosSession> {
        let txn = self.storage.begin_write()?;
        let session = {
            let mut table = txn.open_table(POS_SESSIONS)?;
            let mut session: PosSession = get_doc(&table, session_id)?
                .ok_or_else(|| OrderError::SessionNotFound(session_id.to_string()))?;
            if session.status == SessionStatus::Closed {
                return Err(OrderError::SessionClosed(session_id.to_string()));
            }
            session.status = SessionStatus::Closed;
            session.closed_at = Some(shared::util::now());
            put_doc(&mut table, session_id, &session)?;
            session
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(session)
    }

    // ========== Orders ==========

    pub fn create_order(&self, input: CreateOrder, actor: &str) -> OrderResult<Order> {
        let session = self.get_session(&input.session_id)?;
        if session.status != SessionStatus::Open {
            return Err(OrderError::SessionClosed(session.id));
        }

        let txn = self.storage.begin_write()?;
        let order = {
            let n = next_counter(&txn, "orders")?;
            let now = shared::util::now();
            let order = Order {
                id: shared::util::new_id(),
                display_id: shared::util::display_id("ORD", n),
                venue_id: session.venue_id,
                table_id: input.table_id,
                session_id: session.id,
                server_id: actor.to_string(),
                status: OrderStatus::Open,
                items: Vec::new(),
                totals: OrderTotals {
                    discount: input.discount,
                    ..Default::default()
                },
                payment_status: OrderPaymentStatus::Unpaid,
                created_at: now,
                updated_at: now,
                closed_at: None,
                voided_at: None,
                void_reason: None,
            };
            save_order(&txn, &order)?;
            order
        };
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(order_id = %order.id, display_id = %order.display_id, "Order created");
        Ok(order)
    }

    pub fn get_order(&self, order_id: &str) -> OrderResult<Order> {
        self.storage
            .get(ORDERS, order_id)?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))
    }

    /// Orders of a venue, newest first
    pub fn list_orders(&self, venue_id: &str, status: Option<OrderStatus>) -> OrderResult<Vec<Order>> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(ORDERS)?;
        let mut orders = Vec::new();
        for row in table.iter()? {
            let (_, value) = row?;
            let order: Order = serde_json::from_slice(value.value()).map_err(StorageError::from)?;
            if order.venue_id == venue_id && status.is_none_or(|s| s == order.status) {
                orders.push(order);
            }
        }
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    /// Read-modify-write of one order in its own transaction
    fn modify(&self, order_id: &str, f: impl FnOnce(&mut Order) -> OrderResult<()>) -> OrderResult<Order> {
        let txn = self.storage.begin_write()?;
        let order = {
            let mut order = load_order(&txn, order_id)?;
            f(&mut order)?;
            order.updated_at = shared::util::now();
            save_order(&txn, &order)?;
            order
        };
        txn.commit().map_err(StorageError::from)?;
        Ok(order)
    }

    /// Add a line priced from the session snapshot
    pub fn add_item(&self, order_id: &str, input: AddItem) -> OrderResult<Order> {
        let order = self.get_order(order_id)?;
        let session = self.get_session(&order.session_id)?;
        let entry = session
            .menu
            .get(&input.menu_item_id)
            .cloned()
            .ok_or_else(|| OrderError::NotOnMenu(input.menu_item_id.clone()))?;

        let order = self.modify(order_id, |order| {
            if !matches!(
                order.status,
                OrderStatus::Open | OrderStatus::Sent | OrderStatus::Partial
            ) {
                return Err(invalid_state(order, "add items to"));
            }
            order.items.push(OrderItem {
                id: shared::util::new_id(),
                menu_item_id: entry.menu_item_id,
                name: entry.name,
                qty: input.qty,
                unit_price: entry.price,
                tax_rate_bps: entry.tax_rate_bps,
                prep_area: entry.prep_area,
                seat_no: input.seat_no,
                course_no: input.course_no,
                instructions: input.instructions,
                sent_at: None,
                ticket_id: None,
            });
            totals::recompute(order)?;
            if order.status != OrderStatus::Open {
                let paid = order.totals.paid;
                totals::settle(order, paid);
            }
            Ok(())
        })?;
        tracing::debug!(order_id = %order.id, items = order.items.len(), grand_total = order.totals.grand_total, "Order item added");
        Ok(order)
    }

    /// Remove a line that has not been sent
    pub fn remove_item(&self, order_id: &str, item_id: &str) -> OrderResult<Order> {
        self.modify(order_id, |order| {
            if !matches!(
                order.status,
                OrderStatus::Open | OrderStatus::Sent | OrderStatus::Partial
            ) {
                return Err(invalid_state(order, "remove items from"));
            }
            let pos = order
                .items
                .iter()
                .position(|i| i.id == item_id)
                .ok_or_else(|| OrderError::OrderItemNotFound(item_id.to_string()))?;
            if order.items[pos].sent_at.is_some() {
                return Err(OrderError::ItemSent(item_id.to_string()));
            }
            order.items.remove(pos);
            totals::recompute(order)?;
            if order.status != OrderStatus::Open {
                let paid = order.totals.paid;
                totals::settle(order, paid);
            }
            Ok(())
        })
    }

    /// Route unsent items to the kitchen and consume their stock
    ///
    /// A blocking stock policy failure rejects the whole send: no tickets,
    /// no ledger entries, items stay unsent.
    pub fn send(&self, order_id: &str) -> OrderResult<Order> {
        let order = self.get_order(order_id)?;
        if !matches!(
            order.status,
            OrderStatus::Open | OrderStatus::Sent | OrderStatus::Partial
        ) {
            return Err(invalid_state(&order, "send"));
        }
        let planned: BTreeSet<String> = order
            .items
            .iter()
            .filter(|i| i.sent_at.is_none())
            .map(|i| i.id.clone())
            .collect();
        if planned.is_empty() {
            return Err(OrderError::Empty(order.display_id));
        }

        let requirements = {
            let read_txn = self.storage.begin_read()?;
            let catalog = ReadCatalog::open(&read_txn)?;
            let mut needs: BTreeMap<String, (Decimal, Unit)> = BTreeMap::new();
            for item in order.items.iter().filter(|i| planned.contains(&i.id)) {
                for line in catalog.expand(&item.menu_item_id, Decimal::from(item.qty))? {
                    needs
                        .entry(line.item_id)
                        .or_insert((Decimal::ZERO, line.unit))
                        .0 += line.quantity;
                }
            }
            needs.retain(|_, (qty, _)| *qty > Decimal::ZERO);
            needs
        };
        let item_ids: Vec<String> = requirements.keys().cloned().collect();

        let order = self.stock.run(&item_ids, |batch| {
            let txn = batch.txn();
            let at = batch.at();
            let mut order = load_order(txn, order_id)?;
            if !matches!(
                order.status,
                OrderStatus::Open | OrderStatus::Sent | OrderStatus::Partial
            ) {
                return Err(invalid_state(&order, "send"));
            }

            for (item_id, (qty, unit)) in &requirements {
                batch.consume(
                    item_id,
                    *qty,
                    *unit,
                    LedgerReason::Consumption,
                    RefType::Order,
                    &order.id,
                )?;
            }

            let tickets = {
                let sending: Vec<&OrderItem> = order
                    .items
                    .iter()
                    .filter(|i| i.sent_at.is_none() && planned.contains(&i.id))
                    .collect();
                if sending.is_empty() {
                    return Err(OrderError::Empty(order.display_id.clone()));
                }
                kds::create_tickets(txn, &order, &sending, at)?
            };
            for ticket in &tickets {
                for ticket_item in &ticket.items {
                    if let Some(item) = order
                        .items
                        .iter_mut()
                        .find(|i| i.id == ticket_item.order_item_id)
                    {
                        item.sent_at = Some(at);
                        item.ticket_id = Some(ticket.id.clone());
                    }
                }
            }

            if order.status == OrderStatus::Open {
                order.status = OrderStatus::Sent;
            }
            order.updated_at = at;
            save_order(txn, &order)?;
            tracing::info!(
                order_id = %order.id,
                tickets = tickets.len(),
                stock_items = requirements.len(),
                "Order sent"
            );
            Ok(order)
        })?;
        Ok(order)
    }

    /// Void an unpaid order, crediting its stock back and withdrawing tickets
    pub fn void(&self, order_id: &str, input: VoidOrder, actor: &str) -> OrderResult<Order> {
        let order = self.get_order(order_id)?;
        check_voidable(&order)?;

        let item_ids = self
            .stock
            .ledger()
            .items_for_ref(RefType::Order, order_id)
            .map_err(StockError::from)?;

        self.stock.run(&item_ids, |batch| {
            let txn = batch.txn();
            let at = batch.at();
            let mut order = load_order(txn, order_id)?;
            check_voidable(&order)?;

            let credits = batch.reverse(RefType::Order, &order.id)?;
            let withdrawn = kds::withdraw_for_order(txn, &order.id, actor, at)?;

            order.status = OrderStatus::Voided;
            order.voided_at = Some(at);
            order.void_reason = input.reason.clone();
            order.updated_at = at;
            save_order(txn, &order)?;
            tracing::info!(
                order_id = %order.id,
                credits = credits.len(),
                tickets_withdrawn = withdrawn.len(),
                "Order voided"
            );
            Ok(order)
        })
    }

    pub fn close(&self, order_id: &str) -> OrderResult<Order> {
        let order = self.modify(order_id, |order| match order.status {
            OrderStatus::Paid => {
                order.status = OrderStatus::Closed;
                order.closed_at = Some(shared::util::now());
                Ok(())
            }
            OrderStatus::Sent | OrderStatus::Partial => {
                Err(OrderError::NotSettled(order.display_id.clone()))
            }
            _ => Err(invalid_state(order, "close")),
        })?;
        tracing::info!(order_id = %order.id, "Order closed");
        Ok(order)
    }
}

fn check_voidable(order: &Order) -> OrderResult<()> {
    match order.status {
        OrderStatus::Open | OrderStatus::Sent if order.totals.paid == 0 => Ok(()),
        OrderStatus::Open | OrderStatus::Sent | OrderStatus::Partial | OrderStatus::Paid => {
            Err(OrderError::HasPayments(order.display_id.clone()))
        }
        _ => Err(invalid_state(order, "void")),
    }
}

#[cfg(test)]
mod tests;
