//! POS sessions and orders

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::recipe::PrepArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// Price/tax/routing of a menu item frozen at session open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuSnapshotEntry {
    pub menu_item_id: String,
    pub name: String,
    pub price: i64,
    pub tax_rate_bps: u32,
    pub prep_area: PrepArea,
}

/// POS session, binds a menu snapshot to the orders taken in it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosSession {
    pub id: String,
    pub venue_id: String,
    pub opened_by: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub menu: BTreeMap<String, MenuSnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OpenSession {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Open,
    Sent,
    Partial,
    Paid,
    Closed,
    Voided,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Closed | OrderStatus::Voided)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPaymentStatus {
    #[default]
    Unpaid,
    Partial,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub menu_item_id: String,
    pub name: String,
    pub qty: u32,
    /// Unit price in minor units, from the session snapshot
    pub unit_price: i64,
    pub tax_rate_bps: u32,
    pub prep_area: PrepArea,
    pub seat_no: Option<u32>,
    pub course_no: Option<u32>,
    pub instructions: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub ticket_id: Option<String>,
}

impl OrderItem {
    /// `None` when the line does not fit in minor units
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.qty))
    }
}

/// All amounts in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub discount: i64,
    pub grand_total: i64,
    pub paid: i64,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub display_id: String,
    pub venue_id: String,
    pub table_id: Option<String>,
    pub session_id: String,
    pub server_id: String,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub payment_status: OrderPaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub void_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrder {
    #[validate(length(min = 1))]
    pub session_id: String,
    #[validate(length(max = 64))]
    pub table_id: Option<String>,
    /// Order-level discount in minor units
    #[serde(default)]
    #[validate(range(min = 0))]
    pub discount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddItem {
    #[validate(length(min = 1))]
    pub menu_item_id: String,
    #[validate(range(min = 1, max = 999))]
    pub qty: u32,
    pub seat_no: Option<u32>,
    pub course_no: Option<u32>,
    #[validate(length(max = 500))]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct VoidOrder {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}
