//! FIFO lot selection
//!
//! Lots are drained by `(expiry_date ASC NULLS LAST, received_at ASC, id ASC)`.
//! Only lots holding stock take part; the reconciliation lot, when positive,
//! is drawn after every real lot.

use rust_decimal::Decimal;
use shared::models::Lot;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub lot_id: String,
    pub qty: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoPlan {
    pub draws: Vec<Draw>,
    /// Quantity no lot could cover
    pub shortfall: Decimal,
}

fn fifo_order(a: &Lot, b: &Lot) -> Ordering {
    a.reconciliation
        .cmp(&b.reconciliation)
        .then_with(|| match (a.expiry_date, b.expiry_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.received_at.cmp(&b.received_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Plan draws for `qty` without touching the lots
pub fn plan(lots: &[Lot], qty: Decimal) -> FifoPlan {
    let mut candidates: Vec<&Lot> = lots
        .iter()
        .filter(|l| l.qty_remaining > Decimal::ZERO)
        .collect();
    candidates.sort_by(|a, b| fifo_order(a, b));

    let mut remaining = qty;
    let mut draws = Vec::new();
    for lot in candidates {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(lot.qty_remaining);
        draws.push(Draw {
            lot_id: lot.id.clone(),
            qty: take,
        });
        remaining -= take;
    }

    FifoPlan {
        draws,
        shortfall: remaining.max(Decimal::ZERO),
    }
}
