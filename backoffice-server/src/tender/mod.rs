//! Tender engine: payments, splits, tips
//!
//! Every payment request carries an idempotency key. The key, the payment
//! rows and the order settlement are written in one transaction, so a
//! replayed key always sees either nothing or the complete outcome.

use redb::WriteTransaction;
use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    AddPayment, AddTip, Order, OrderStatus, Payment, PaymentStatus, SplitBySeat, SplitEqual,
    TenderType, TipRecord,
};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::db::idempotency::{self, IdempotencyRecord};
use crate::db::tables::{PAYMENTS, PAYMENTS_BY_ORDER, TIPS};
use crate::db::{Storage, StorageError, get_doc, index_ids, put_doc};
use crate::orders::{self, OrderError};

const SCOPE_PAYMENT: &str = "payment";
const SCOPE_SPLIT: &str = "split";

#[derive(Debug, Error)]
pub enum TenderError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    #[error("{0}")]
    InvalidAmount(String),

    #[error("Payment {id} is {status:?}")]
    PaymentState { id: String, status: PaymentStatus },

    #[error("Order {display_id} cannot take payments in status {status:?}")]
    OrderState {
        display_id: String,
        status: OrderStatus,
    },

    #[error("{0}")]
    Split(String),

    #[error("Idempotency key {0} was used with a different request")]
    IdempotencyConflict(String),
}

impl From<redb::TableError> for TenderError {
    fn from(e: redb::TableError) -> Self {
        TenderError::Storage(e.into())
    }
}

impl From<redb::StorageError> for TenderError {
    fn from(e: redb::StorageError) -> Self {
        TenderError::Storage(e.into())
    }
}

pub type TenderResult<T> = Result<T, TenderError>;

impl From<TenderError> for AppError {
    fn from(err: TenderError) -> Self {
        let message = err.to_string();
        match err {
            TenderError::Storage(e) => e.into(),
            TenderError::Order(e) => e.into(),
            TenderError::PaymentNotFound(_) => {
                AppError::with_message(ErrorCode::PaymentNotFound, message)
            }
            TenderError::InvalidAmount(_) => {
                AppError::with_message(ErrorCode::PaymentInvalidAmount, message)
            }
            TenderError::PaymentState { .. } => {
                AppError::with_message(ErrorCode::PaymentStateInvalid, message)
            }
            TenderError::OrderState { .. } => {
                AppError::with_message(ErrorCode::OrderStateInvalid, message)
            }
            TenderError::Split(_) => AppError::with_message(ErrorCode::SplitInvalid, message),
            TenderError::IdempotencyConflict(_) => {
                AppError::with_message(ErrorCode::IdempotencyConflict, message)
            }
        }
    }
}

/// Fields of a split that decide its outcome
#[derive(Serialize)]
struct SplitFingerprint<'a, T: Serialize> {
    order_id: &'a str,
    kind: &'static str,
    request: &'a T,
}

fn load_payment(txn: &WriteTransaction, payment_id: &str) -> TenderResult<Payment> {
    let table = txn.open_table(PAYMENTS)?;
    get_doc(&table, payment_id)?.ok_or_else(|| TenderError::PaymentNotFound(payment_id.to_string()))
}

fn save_payment(txn: &WriteTransaction, payment: &Payment) -> TenderResult<()> {
    let mut table = txn.open_table(PAYMENTS)?;
    put_doc(&mut table, &payment.id, payment)?;
    let mut index = txn.open_table(PAYMENTS_BY_ORDER)?;
    index.insert((payment.order_id.as_str(), payment.id.as_str()), ())?;
    Ok(())
}

fn order_payments(txn: &WriteTransaction, order_id: &str) -> TenderResult<Vec<Payment>> {
    let ids = {
        let index = txn.open_table(PAYMENTS_BY_ORDER)?;
        index_ids(&index, order_id)?
    };
    let table = txn.open_table(PAYMENTS)?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(p) = get_doc(&table, &id)? {
            out.push(p);
        }
    }
    Ok(out)
}

/// Sum completed payments and push the result onto the order
fn resettle(txn: &WriteTransaction, order_id: &str) -> TenderResult<Order> {
    let paid: i64 = order_payments(txn, order_id)?
        .iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .map(|p| p.amount)
        .sum();
    Ok(orders::settle_order(txn, order_id, paid)?)
}

/// Order that may take new payments, and the amount still open for them
///
/// Pending card payments count against the balance.
fn payable(txn: &WriteTransaction, order_id: &str) -> TenderResult<(Order, i64)> {
    let order = orders::load_order(txn, order_id)?;
    if !matches!(order.status, OrderStatus::Sent | OrderStatus::Partial) {
        return Err(TenderError::OrderState {
            display_id: order.display_id,
            status: order.status,
        });
    }
    let pending: i64 = order_payments(txn, order_id)?
        .iter()
        .filter(|p| p.status == PaymentStatus::Pending)
        .map(|p| p.amount)
        .sum();
    let outstanding = order.totals.balance - pending;
    Ok((order, outstanding))
}

/// Replay check; returns the stored payments when the key was already used
fn replayed(
    txn: &WriteTransaction,
    scope: &str,
    key: &str,
    fingerprint: &str,
) -> TenderResult<Option<Vec<Payment>>> {
    match idempotency::lookup(txn, scope, key)? {
        Some(rec) if rec.fingerprint == fingerprint => {
            let mut payments = Vec::with_capacity(rec.resource_ids.len());
            for id in &rec.resource_ids {
                payments.push(load_payment(txn, id)?);
            }
            Ok(Some(payments))
        }
        Some(_) => Err(TenderError::IdempotencyConflict(key.to_string())),
        None => Ok(None),
    }
}

#[allow(clippy::too_many_arguments)]
fn new_payment(
    order_id: &str,
    tender_type: TenderType,
    amount: i64,
    tip_amount: i64,
    seat_refs: Vec<u32>,
    is_split: bool,
    idempotency_key: &str,
    actor: &str,
) -> Payment {
    let now = shared::util::now();
    let external = tender_type.is_external();
    Payment {
        id: shared::util::new_id(),
        order_id: order_id.to_string(),
        tender_type,
        amount,
        tip_amount,
        status: if external {
            PaymentStatus::Pending
        } else {
            PaymentStatus::Completed
        },
        seat_refs,
        is_split,
        idempotency_key: Some(idempotency_key.to_string()),
        created_by: actor.to_string(),
        created_at: now,
        completed_at: (!external).then_some(now),
        voided_at: None,
    }
}

#[derive(Clone)]
pub struct TenderEngine {
    storage: Storage,
}

impl TenderEngine {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Write payments under an idempotency key and resettle the order
    fn commit_payments(
        &self,
        txn: WriteTransaction,
        scope: &str,
        key: &str,
        fingerprint: String,
        payments: Vec<Payment>,
    ) -> TenderResult<(Vec<Payment>, Order)> {
        let order_id = payments
            .first()
            .map(|p| p.order_id.clone())
            .ok_or_else(|| TenderError::Split("no payments to record".into()))?;
        for payment in &payments {
            save_payment(&txn, payment)?;
        }
        idempotency::record(
            &txn,
            scope,
            key,
            &IdempotencyRecord {
                fingerprint,
                resource_ids: payments.iter().map(|p| p.id.clone()).collect(),
                created_at: shared::util::now(),
            },
        )?;
        let order = resettle(&txn, &order_id)?;
        txn.commit().map_err(StorageError::from)?;

        for p in &payments {
            tracing::info!(
                payment_id = %p.id,
                order_id = %p.order_id,
                tender = ?p.tender_type,
                amount = p.amount,
                status = ?p.status,
                "Payment recorded"
            );
        }
        Ok((payments, order))
    }

    pub fn add_payment(
        &self,
        order_id: &str,
        input: AddPayment,
        actor: &str,
    ) -> TenderResult<(Payment, Order)> {
        let fingerprint = idempotency::request_fingerprint(&(order_id, &input));
        let txn = self.storage.begin_write()?;

        if let Some(mut existing) = replayed(&txn, SCOPE_PAYMENT, &input.idempotency_key, &fingerprint)? {
            let order = orders::load_order(&txn, order_id)?;
            tracing::debug!(order_id, key = %input.idempotency_key, "Payment replayed");
            return existing
                .pop()
                .map(|p| (p, order))
                .ok_or_else(|| TenderError::PaymentNotFound(input.idempotency_key.clone()));
        }

        let (_, outstanding) = payable(&txn, order_id)?;
        if input.amount > outstanding {
            return Err(TenderError::InvalidAmount(format!(
                "amount {} exceeds outstanding balance {}",
                input.amount, outstanding
            )));
        }

        let payment = new_payment(
            order_id,
            input.tender_type,
            input.amount,
            input.tip_amount,
            input.seat_refs.clone(),
            false,
            &input.idempotency_key,
            actor,
        );
        let (mut payments, order) =
            self.commit_payments(txn, SCOPE_PAYMENT, &input.idempotency_key, fingerprint, vec![payment])?;
        payments
            .pop()
            .map(|p| (p, order))
            .ok_or_else(|| TenderError::PaymentNotFound(input.idempotency_key))
    }

    /// `n` payments over the remaining balance; the last takes the remainder
    pub fn split_equal(
        &self,
        order_id: &str,
        input: SplitEqual,
        actor: &str,
    ) -> TenderResult<(Vec<Payment>, Order)> {
        let fingerprint = idempotency::request_fingerprint(&SplitFingerprint {
            order_id,
            kind: "equal",
            request: &input,
        });
        let txn = self.storage.begin_write()?;
        if let Some(existing) = replayed(&txn, SCOPE_SPLIT, &input.idempotency_key, &fingerprint)? {
            let order = orders::load_order(&txn, order_id)?;
            return Ok((existing, order));
        }

        let (_, outstanding) = payable(&txn, order_id)?;
        let n = i64::from(input.n);
        if n < 2 {
            return Err(TenderError::Split("split needs at least two parts".into()));
        }
        let share = outstanding / n;
        if share <= 0 {
            return Err(TenderError::Split(format!(
                "balance {outstanding} cannot be split {n} ways"
            )));
        }
        let last = outstanding - share * (n - 1);

        let payments = (0..n)
            .map(|i| {
                let amount = if i == n - 1 { last } else { share };
                new_payment(
                    order_id,
                    input.tender_type,
                    amount,
                    0,
                    Vec::new(),
                    true,
                    &input.idempotency_key,
                    actor,
                )
            })
            .collect();
        self.commit_payments(txn, SCOPE_SPLIT, &input.idempotency_key, fingerprint, payments)
    }

    /// One payment per seat group
    pub fn split_by_seat(
        &self,
        order_id: &str,
        input: SplitBySeat,
        actor: &str,
    ) -> TenderResult<(Vec<Payment>, Order)> {
        let fingerprint = idempotency::request_fingerprint(&SplitFingerprint {
            order_id,
            kind: "seat",
            request: &input,
        });
        let txn = self.storage.begin_write()?;
        if let Some(existing) = replayed(&txn, SCOPE_SPLIT, &input.idempotency_key, &fingerprint)? {
            let order = orders::load_order(&txn, order_id)?;
            return Ok((existing, order));
        }

        let (_, outstanding) = payable(&txn, order_id)?;
        let mut seen = BTreeSet::new();
        let mut total = 0i64;
        for group in &input.seat_payments {
            if group.seat_refs.is_empty() {
                return Err(TenderError::Split("seat group without seats".into()));
            }
            if group.amount <= 0 {
                return Err(TenderError::InvalidAmount("seat amount must be positive".into()));
            }
            for seat in &group.seat_refs {
                if !seen.insert(*seat) {
                    return Err(TenderError::Split(format!("seat {seat} appears twice")));
                }
            }
            total += group.amount;
        }
        if total > outstanding {
            return Err(TenderError::InvalidAmount(format!(
                "seat payments {total} exceed outstanding balance {outstanding}"
            )));
        }

        let payments = input
            .seat_payments
            .iter()
            .map(|g| {
                new_payment(
                    order_id,
                    g.tender_type,
                    g.amount,
                    0,
                    g.seat_refs.clone(),
                    true,
                    &input.idempotency_key,
                    actor,
                )
            })
            .collect();
        self.commit_payments(txn, SCOPE_SPLIT, &input.idempotency_key, fingerprint, payments)
    }

    /// Card processor outcome for a pending payment
    pub fn confirm_payment(&self, payment_id: &str, success: bool) -> TenderResult<(Payment, Order)> {
        self.update_payment(payment_id, |payment, order| {
            if payment.status != PaymentStatus::Pending {
                return Err(TenderError::PaymentState {
                    id: payment.id.clone(),
                    status: payment.status,
                });
            }
            let now = shared::util::now();
            if success {
                if order.status.is_terminal() {
                    return Err(TenderError::OrderState {
                        display_id: order.display_id.clone(),
                        status: order.status,
                    });
                }
                payment.status = PaymentStatus::Completed;
                payment.completed_at = Some(now);
            } else {
                payment.status = PaymentStatus::Voided;
                payment.voided_at = Some(now);
            }
            Ok(())
        })
    }

    /// Void a payment while its order is still open for settlement
    pub fn void_payment(&self, payment_id: &str) -> TenderResult<(Payment, Order)> {
        self.update_payment(payment_id, |payment, order| {
            if order.status == OrderStatus::Closed {
                return Err(TenderError::OrderState {
                    display_id: order.display_id.clone(),
                    status: order.status,
                });
            }
            if payment.status == PaymentStatus::Voided {
                return Err(TenderError::PaymentState {
                    id: payment.id.clone(),
                    status: payment.status,
                });
            }
            payment.status = PaymentStatus::Voided;
            payment.voided_at = Some(shared::util::now());
            Ok(())
        })
    }

    fn update_payment(
        &self,
        payment_id: &str,
        f: impl FnOnce(&mut Payment, &Order) -> TenderResult<()>,
    ) -> TenderResult<(Payment, Order)> {
        let txn = self.storage.begin_write()?;
        let mut payment = load_payment(&txn, payment_id)?;
        let order = orders::load_order(&txn, &payment.order_id)?;
        f(&mut payment, &order)?;
        save_payment(&txn, &payment)?;
        let order = resettle(&txn, &order.id)?;
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(payment_id, order_id = %order.id, status = ?payment.status, "Payment updated");
        Ok((payment, order))
    }

    /// Amend a payment's tip and keep a record for reporting
    pub fn add_tip(&self, payment_id: &str, input: AddTip, actor: &str) -> TenderResult<TipRecord> {
        if input.tip_amount <= 0 {
            return Err(TenderError::InvalidAmount("tip must be positive".into()));
        }
        let txn = self.storage.begin_write()?;
        let mut payment = load_payment(&txn, payment_id)?;
        if payment.status == PaymentStatus::Voided {
            return Err(TenderError::PaymentState {
                id: payment.id,
                status: payment.status,
            });
        }
        payment.tip_amount += input.tip_amount;
        save_payment(&txn, &payment)?;

        let record = TipRecord {
            id: shared::util::new_id(),
            payment_id: payment.id.clone(),
            order_id: payment.order_id.clone(),
            tip_amount: input.tip_amount,
            pooled: input.pooled,
            recorded_by: actor.to_string(),
            recorded_at: shared::util::now(),
        };
        {
            let mut table = txn.open_table(TIPS)?;
            put_doc(&mut table, &record.id, &record)?;
        }
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(payment_id, tip = record.tip_amount, pooled = record.pooled, "Tip recorded");
        Ok(record)
    }

    pub fn get_payment(&self, payment_id: &str) -> TenderResult<Payment> {
        self.storage
            .get(PAYMENTS, payment_id)?
            .ok_or_else(|| TenderError::PaymentNotFound(payment_id.to_string()))
    }

    pub fn list_payments(&self, order_id: &str) -> TenderResult<Vec<Payment>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(PAYMENTS_BY_ORDER)?;
        let docs = read_txn.open_table(PAYMENTS)?;
        let mut payments: Vec<Payment> = crate::db::load_indexed(&index, &docs, order_id)?;
        payments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(payments)
    }
}

#[cfg(test)]
mod tests;
