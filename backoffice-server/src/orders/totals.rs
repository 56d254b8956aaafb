//! Order totals and settlement status
//!
//! All amounts are integer minor units. Tax is computed per line from the
//! snapshot rate and rounded half-up; the discount is capped at the taxed
//! subtotal so the grand total never goes negative.

use shared::models::{Order, OrderPaymentStatus, OrderStatus, OrderTotals};

use super::{OrderError, OrderResult};

/// `amount × bps / 10000`, rounded half-up
///
/// `None` if the result does not fit in an `i64`.
pub fn line_tax(amount: i64, tax_rate_bps: u32) -> Option<i64> {
    let scaled = i128::from(amount) * i128::from(tax_rate_bps);
    let rounded = if scaled >= 0 {
        (scaled + 5_000) / 10_000
    } else {
        (scaled - 5_000) / 10_000
    };
    i64::try_from(rounded).ok()
}

/// Recompute totals from the items, keeping the paid amount
///
/// Leaves the order untouched when any amount overflows.
pub fn recompute(order: &mut Order) -> OrderResult<()> {
    let out_of_range = || OrderError::AmountOutOfRange(order.display_id.clone());

    let mut subtotal: i64 = 0;
    let mut tax: i64 = 0;
    for item in &order.items {
        let line = item.line_total().ok_or_else(out_of_range)?;
        let line_tax_amount = line_tax(line, item.tax_rate_bps).ok_or_else(out_of_range)?;
        subtotal = subtotal.checked_add(line).ok_or_else(out_of_range)?;
        tax = tax.checked_add(line_tax_amount).ok_or_else(out_of_range)?;
    }
    let taxed = subtotal.checked_add(tax).ok_or_else(out_of_range)?;
    let discount = order.totals.discount.clamp(0, taxed);
    let grand_total = taxed - discount;
    let balance = grand_total
        .checked_sub(order.totals.paid)
        .ok_or_else(out_of_range)?;

    order.totals = OrderTotals {
        subtotal,
        tax,
        discount,
        grand_total,
        paid: order.totals.paid,
        balance,
    };
    Ok(())
}

/// Apply the completed-payment sum to an order's totals and status
///
/// Only orders past `OPEN` and not terminal carry a payment status:
/// fully covered is PAID, partly covered PARTIAL, nothing paid falls back
/// to SENT.
pub fn settle(order: &mut Order, paid: i64) {
    order.totals.paid = paid;
    order.totals.balance = order.totals.grand_total.saturating_sub(paid);

    let (status, payment_status) = if paid <= 0 {
        (OrderStatus::Sent, OrderPaymentStatus::Unpaid)
    } else if paid >= order.totals.grand_total {
        (OrderStatus::Paid, OrderPaymentStatus::Paid)
    } else {
        (OrderStatus::Partial, OrderPaymentStatus::Partial)
    };
    order.payment_status = payment_status;
    if matches!(
        order.status,
        OrderStatus::Sent | OrderStatus::Partial | OrderStatus::Paid
    ) {
        order.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_tax_rounds_half_up() {
        assert_eq!(line_tax(1000, 1800), Some(180));
        assert_eq!(line_tax(25, 1800), Some(5)); // 4.5
        assert_eq!(line_tax(24, 1800), Some(4)); // 4.32
        assert_eq!(line_tax(999, 0), Some(0));
    }

    #[test]
    fn test_line_tax_does_not_truncate() {
        assert_eq!(line_tax(i64::MAX, 10_000), Some(i64::MAX));
        assert_eq!(line_tax(i64::MAX, 20_000), None);
    }
}
