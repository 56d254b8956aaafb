//! Table definitions
//!
//! Documents are JSON under a string id. Index tables carry composite keys
//! and a unit value; range scans over a key prefix give the ordered lookups.
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | `items` | `item_id` | `Item` |
//! | `items_by_venue` | `(venue_id, item_id)` | `()` |
//! | `ledger` | `(item_id, seq)` | `LedgerEntry` |
//! | `ledger_by_ref` | `(ref_key, item_id, seq)` | `()` |
//! | `lots` | `item_id/lot_number` | `Lot` |
//! | `lots_by_item` | `(item_id, lot_id)` | `()` |
//! | `suppliers` | `supplier_id` | `Supplier` |
//! | `purchase_orders` | `po_id` | `PurchaseOrder` |
//! | `stock_counts` | `count_id` | `StockCount` |
//! | `waste` | `waste_id` | `WasteRecord` |
//! | `waste_by_venue` | `(venue_id, created_ms, waste_id)` | `()` |
//! | `outbox` | `seq` | `OutboxEvent` |
//! | `menu_items` | `menu_item_id` | `MenuItem` |
//! | `menu_by_venue` | `(venue_id, menu_item_id)` | `()` |
//! | `recipes` | `recipe_id` | `Recipe` |
//! | `pos_sessions` | `session_id` | `PosSession` |
//! | `orders` | `order_id` | `Order` |
//! | `payments` | `payment_id` | `Payment` |
//! | `payments_by_order` | `(order_id, payment_id)` | `()` |
//! | `tips` | `tip_id` | `TipRecord` |
//! | `tickets` | `ticket_id` | `Ticket` |
//! | `tickets_by_venue` | `(venue_id, status, created_ms, ticket_id)` | `()` |
//! | `tickets_by_order` | `(order_id, ticket_id)` | `()` |
//! | `ticket_ops` | `(ticket_id, op_id)` | `()` |
//! | `stations` | `(venue_id, station_key)` | `Station` |
//! | `error_records` | `error_id` | `ErrorRecord` |
//! | `errors_by_venue` | `(venue_id, error_id)` | `()` |
//! | `error_fingerprints` | `(venue_id, fingerprint)` | `error_id` |
//! | `action_tokens` | `token` | `ActionToken` |
//! | `idempotency` | `scope:key` | `IdempotencyRecord` |
//! | `counters` | `name` | `u64` |

use redb::TableDefinition;

pub type DocTable = TableDefinition<'static, &'static str, &'static [u8]>;
pub type PairIndex = TableDefinition<'static, (&'static str, &'static str), ()>;

// ========== Inventory ==========

pub const ITEMS: DocTable = TableDefinition::new("items");
pub const ITEMS_BY_VENUE: PairIndex = TableDefinition::new("items_by_venue");
pub const LEDGER: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("ledger");
pub const LEDGER_BY_REF: TableDefinition<(&str, &str, u64), ()> =
    TableDefinition::new("ledger_by_ref");
pub const LOTS: DocTable = TableDefinition::new("lots");
pub const LOTS_BY_ITEM: PairIndex = TableDefinition::new("lots_by_item");
pub const SUPPLIERS: DocTable = TableDefinition::new("suppliers");
pub const PURCHASE_ORDERS: DocTable = TableDefinition::new("purchase_orders");
pub const STOCK_COUNTS: DocTable = TableDefinition::new("stock_counts");
pub const WASTE: DocTable = TableDefinition::new("waste");
pub const WASTE_BY_VENUE: TableDefinition<(&str, i64, &str), ()> =
    TableDefinition::new("waste_by_venue");
pub const OUTBOX: TableDefinition<u64, &[u8]> = TableDefinition::new("outbox");

// ========== Recipes ==========

pub const MENU_ITEMS: DocTable = TableDefinition::new("menu_items");
pub const MENU_BY_VENUE: PairIndex = TableDefinition::new("menu_by_venue");
pub const RECIPES: DocTable = TableDefinition::new("recipes");

// ========== POS ==========

pub const POS_SESSIONS: DocTable = TableDefinition::new("pos_sessions");
pub const ORDERS: DocTable = TableDefinition::new("orders");
pub const PAYMENTS: DocTable = TableDefinition::new("payments");
pub const PAYMENTS_BY_ORDER: PairIndex = TableDefinition::new("payments_by_order");
pub const TIPS: DocTable = TableDefinition::new("tips");

// ========== KDS ==========

pub const TICKETS: DocTable = TableDefinition::new("tickets");
pub const TICKETS_BY_VENUE: TableDefinition<(&str, &str, i64, &str), ()> =
    TableDefinition::new("tickets_by_venue");
pub const TICKETS_BY_ORDER: PairIndex = TableDefinition::new("tickets_by_order");
pub const TICKET_OPS: PairIndex = TableDefinition::new("ticket_ops");
pub const STATIONS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("stations");

// ========== Observability ==========

pub const ERROR_RECORDS: DocTable = TableDefinition::new("error_records");
pub const ERRORS_BY_VENUE: PairIndex = TableDefinition::new("errors_by_venue");
pub const ERROR_FINGERPRINTS: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("error_fingerprints");
pub const ACTION_TOKENS: DocTable = TableDefinition::new("action_tokens");

// ========== Shared ==========

pub const IDEMPOTENCY: DocTable = TableDefinition::new("idempotency");
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
