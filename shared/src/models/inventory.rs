//! Inventory models: items, lots, ledger entries, procurement, counts, waste

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Measurement unit of a stock quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    G,
    Kg,
    Ml,
    Cl,
    L,
    Each,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Mass,
    Volume,
    Count,
}

impl Unit {
    fn dimension(&self) -> Dimension {
        match self {
            Unit::G | Unit::Kg => Dimension::Mass,
            Unit::Ml | Unit::Cl | Unit::L => Dimension::Volume,
            Unit::Each => Dimension::Count,
        }
    }

    /// Multiplier to the smallest unit of the same dimension
    fn factor(&self) -> Decimal {
        match self {
            Unit::G | Unit::Ml | Unit::Each => Decimal::ONE,
            Unit::Cl => Decimal::TEN,
            Unit::Kg | Unit::L => Decimal::ONE_THOUSAND,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::G => "g",
            Unit::Kg => "kg",
            Unit::Ml => "ml",
            Unit::Cl => "cl",
            Unit::L => "l",
            Unit::Each => "each",
        }
    }

    /// Convert `qty` expressed in `self` into `to`.
    ///
    /// Returns `None` when the units measure different things (mass vs volume).
    pub fn convert(&self, qty: Decimal, to: Unit) -> Option<Decimal> {
        if self.dimension() != to.dimension() {
            return None;
        }
        if *self == to {
            return Some(qty);
        }
        Some(qty * self.factor() / to.factor())
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "g" => Ok(Unit::G),
            "kg" => Ok(Unit::Kg),
            "ml" => Ok(Unit::Ml),
            "cl" => Ok(Unit::Cl),
            "l" => Ok(Unit::L),
            "each" | "ea" | "pcs" => Ok(Unit::Each),
            other => Err(format!("unknown unit '{other}'")),
        }
    }
}

/// What happens when a consumption exceeds on-hand stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockPolicy {
    /// Drain available lots, book the shortfall without a lot and warn
    #[default]
    AllowNegative,
    /// Refuse with INSUFFICIENT_STOCK
    Block,
}

/// Stock item (ingredient or sellable good)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub venue_id: String,
    pub name: String,
    pub base_unit: Unit,
    pub reorder_point: Decimal,
    pub reorder_qty: Decimal,
    /// Cached projection of the ledger
    pub current_stock: Decimal,
    /// Seq of the last ledger entry folded into `current_stock`
    pub last_seq: u64,
    /// Latest unit cost in minor units
    pub cost: i64,
    #[serde(default)]
    pub stock_policy: StockPolicy,
    #[serde(default)]
    pub auto_reorder: bool,
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create item payload
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ItemCreate {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub base_unit: Unit,
    #[serde(default)]
    pub reorder_point: Decimal,
    #[serde(default)]
    pub reorder_qty: Decimal,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub cost: i64,
    #[serde(default)]
    pub stock_policy: Option<StockPolicy>,
    #[serde(default)]
    pub auto_reorder: bool,
}

/// Update item payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub reorder_point: Option<Decimal>,
    pub reorder_qty: Option<Decimal>,
    pub stock_policy: Option<StockPolicy>,
    pub auto_reorder: Option<bool>,
}

/// A received batch of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    /// Storage key, scoped to the item
    pub id: String,
    pub item_id: String,
    /// Supplier lot number; unique per item, not across items
    #[serde(default)]
    pub lot_number: Option<String>,
    pub received_at: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub qty_received: Decimal,
    pub qty_remaining: Decimal,
    /// Unit cost in minor units
    pub unit_cost: i64,
    /// Purchase order the lot came from
    pub source_ref: Option<String>,
    /// Per-item reconciliation lot; the only lot allowed below zero
    #[serde(default)]
    pub reconciliation: bool,
}

impl Lot {
    pub fn is_depleted(&self) -> bool {
        !self.reconciliation && self.qty_remaining <= Decimal::ZERO
    }
}

/// Why a ledger entry exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    Receipt,
    Consumption,
    StockAdjustment,
    Waste,
    Transfer,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::Receipt => "RECEIPT",
            LedgerReason::Consumption => "CONSUMPTION",
            LedgerReason::StockAdjustment => "STOCK_ADJUSTMENT",
            LedgerReason::Waste => "WASTE",
            LedgerReason::Transfer => "TRANSFER",
        }
    }
}

/// What kind of document caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefType {
    PurchaseOrder,
    Order,
    Count,
    Waste,
    Void,
    Transfer,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefType::PurchaseOrder => "PURCHASE_ORDER",
            RefType::Order => "ORDER",
            RefType::Count => "COUNT",
            RefType::Waste => "WASTE",
            RefType::Void => "VOID",
            RefType::Transfer => "TRANSFER",
        }
    }
}

/// Immutable, hash-chained stock event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub item_id: String,
    /// Monotonic per item, contiguous, starting at 1
    pub seq: u64,
    pub qty_delta: Decimal,
    pub unit: Unit,
    pub reason: LedgerReason,
    pub ref_type: RefType,
    pub ref_id: String,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub prev_hash: String,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

/// One lot draw produced by a FIFO consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionDetail {
    pub item_id: String,
    /// `None` for the unbacked shortfall under ALLOW_NEGATIVE
    pub lot_id: Option<String>,
    pub qty: Decimal,
    pub unit_cost: i64,
    pub expiry_date: Option<NaiveDate>,
    /// Ledger seq of the entry recording this draw
    pub seq: u64,
}

/// Stock position of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockSnapshot {
    pub item_id: String,
    pub current_stock: Decimal,
    pub last_seq: u64,
    pub lots: Vec<Lot>,
    pub reorder_needed: bool,
}

/// Result of a hash-chain verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub item_id: String,
    pub ok: bool,
    pub entries: u64,
    pub first_broken_seq: Option<u64>,
}

// ==================== Suppliers & purchase orders ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Supplier {
    pub id: String,
    pub venue_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SupplierCreate {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Approved,
    PartiallyReceived,
    Received,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub item_id: String,
    pub qty_ordered: Decimal,
    pub qty_received: Decimal,
    pub unit_cost: i64,
}

impl PurchaseOrderLine {
    pub fn outstanding(&self) -> Decimal {
        (self.qty_ordered - self.qty_received).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: String,
    pub display_id: String,
    pub venue_id: String,
    pub supplier_id: String,
    pub status: PurchaseOrderStatus,
    pub lines: Vec<PurchaseOrderLine>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseOrderLineInput {
    #[validate(length(min = 1))]
    pub item_id: String,
    pub qty: Decimal,
    #[validate(range(min = 0))]
    pub unit_cost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseOrderCreate {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    #[validate(length(min = 1))]
    pub supplier_id: String,
    #[validate(length(min = 1), nested)]
    pub lines: Vec<PurchaseOrderLineInput>,
}

/// One line of a goods receipt
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceiveLine {
    #[validate(length(min = 1))]
    pub item_id: String,
    pub qty_received: Decimal,
    /// Supplier lot number; generated when absent
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    /// Overrides the PO line cost
    pub unit_cost: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceivePurchaseOrder {
    #[validate(length(min = 1), nested)]
    pub lines: Vec<ReceiveLine>,
}

// ==================== Stock counts ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockCountStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCountLine {
    pub item_id: String,
    pub counted_qty: Decimal,
    /// Stock on hand when the line was submitted
    pub theoretical_qty: Decimal,
    pub variance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockCount {
    pub id: String,
    pub display_id: String,
    pub venue_id: String,
    pub status: StockCountStatus,
    pub lines: Vec<StockCountLine>,
    pub started_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of ledger entries emitted on completion
    #[serde(default)]
    pub adjustments: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StockCountStart {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CountLineInput {
    #[validate(length(min = 1))]
    pub item_id: String,
    pub counted_qty: Decimal,
}

// ==================== Waste ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteRecord {
    pub id: String,
    pub venue_id: String,
    pub item_id: String,
    pub qty: Decimal,
    pub reason_code: String,
    pub notes: Option<String>,
    pub details: Vec<ConsumptionDetail>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WasteCreate {
    #[validate(length(min = 1))]
    pub item_id: String,
    pub qty: Decimal,
    #[validate(length(min = 1, max = 64))]
    pub reason_code: String,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

// ==================== Procurement events ====================

/// Emitted when stock falls to or below the reorder point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowStockEvent {
    pub item_id: String,
    pub venue_id: String,
    pub item_name: String,
    pub current_stock: Decimal,
    pub reorder_point: Decimal,
    pub reorder_qty: Decimal,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxPayload {
    LowStock(LowStockEvent),
}

/// Durable event awaiting delivery to a collaborator
///
/// Rows leave the outbox once delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub seq: u64,
    pub payload: OutboxPayload,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(Unit::Kg.convert(dec!(1.5), Unit::G), Some(dec!(1500)));
        assert_eq!(Unit::Ml.convert(dec!(250), Unit::L), Some(dec!(0.25)));
        assert_eq!(Unit::Cl.convert(dec!(4), Unit::Ml), Some(dec!(40)));
        assert_eq!(Unit::Each.convert(dec!(3), Unit::Each), Some(dec!(3)));
        assert_eq!(Unit::G.convert(dec!(1), Unit::Ml), None);
    }

    #[test]
    fn test_unit_parse() {
        assert_eq!("KG".parse::<Unit>().unwrap(), Unit::Kg);
        assert_eq!("ea".parse::<Unit>().unwrap(), Unit::Each);
        assert!("cup".parse::<Unit>().is_err());
    }

    #[test]
    fn test_reason_wire_names() {
        let json = serde_json::to_string(&LedgerReason::StockAdjustment).unwrap();
        assert_eq!(json, "\"STOCK_ADJUSTMENT\"");
        assert_eq!(LedgerReason::StockAdjustment.as_str(), "STOCK_ADJUSTMENT");
        let json = serde_json::to_string(&RefType::PurchaseOrder).unwrap();
        assert_eq!(json, "\"PURCHASE_ORDER\"");
    }

    #[test]
    fn test_item_create_validation() {
        let create = ItemCreate {
            venue_id: String::new(),
            name: "Flour".into(),
            base_unit: Unit::Kg,
            reorder_point: Decimal::ZERO,
            reorder_qty: Decimal::ZERO,
            cost: 120,
            stock_policy: None,
            auto_reorder: false,
        };
        assert!(create.validate().is_err());
    }
}
