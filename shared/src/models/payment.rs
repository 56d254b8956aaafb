//! Payments, splits and tips

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TenderType {
    Cash,
    Card,
    Voucher,
    Other,
}

impl TenderType {
    /// Settled by an external processor; stays PENDING until confirmed
    pub fn is_external(&self) -> bool {
        matches!(self, TenderType::Card)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Voided,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub tender_type: TenderType,
    /// Minor units, tips excluded
    pub amount: i64,
    pub tip_amount: i64,
    pub status: PaymentStatus,
    #[serde(default)]
    pub seat_refs: Vec<u32>,
    #[serde(default)]
    pub is_split: bool,
    pub idempotency_key: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
}

/// Post-hoc tip amendment, kept for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipRecord {
    pub id: String,
    pub payment_id: String,
    pub order_id: String,
    pub tip_amount: i64,
    pub pooled: bool,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddPayment {
    pub tender_type: TenderType,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub tip_amount: i64,
    #[serde(default)]
    pub seat_refs: Vec<u32>,
    /// May instead arrive as the `Idempotency-Key` header
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SplitEqual {
    #[validate(range(min = 2, max = 50))]
    pub n: u32,
    pub tender_type: TenderType,
    /// May instead arrive as the `Idempotency-Key` header
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SeatPayment {
    #[validate(length(min = 1))]
    pub seat_refs: Vec<u32>,
    pub tender_type: TenderType,
    #[validate(range(min = 1))]
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SplitBySeat {
    #[validate(length(min = 1), nested)]
    pub seat_payments: Vec<SeatPayment>,
    /// May instead arrive as the `Idempotency-Key` header
    #[serde(default)]
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddTip {
    #[validate(range(min = 1))]
    pub tip_amount: i64,
    #[serde(default)]
    pub pooled: bool,
}

/// Outcome reported by the card processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub success: bool,
}
