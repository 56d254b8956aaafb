//! Unified error codes for the back-office platform
//!
//! Codes are grouped by domain and serialized as SCREAMING_SNAKE strings so
//! clients can branch on them without a lookup table:
//! - General / validation
//! - Auth and feature gating
//! - Inventory (stock engine and ledger)
//! - Recipes
//! - Orders and payments
//! - Kitchen display
//! - Observability (error inbox and replay)
//! - Payroll
//! - System

use serde::{Deserialize, Serialize};
use std::fmt;

use super::kind::ErrorKind;

/// Unified error code enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ==================== General ====================
    /// Validation failed
    ValidationFailed,
    /// Invalid request
    InvalidRequest,
    /// Resource not found
    NotFound,
    /// Resource already exists
    AlreadyExists,

    // ==================== Auth ====================
    /// No credentials supplied
    NotAuthenticated,
    /// Credentials could not be verified
    SessionInvalid,
    /// Credentials have expired
    SessionExpired,
    /// Authenticated but not allowed
    PermissionDenied,
    /// Module disabled for the venue
    FeatureDisabled,

    // ==================== Inventory ====================
    ItemNotFound,
    ItemArchived,
    LotNotFound,
    SupplierNotFound,
    PurchaseOrderNotFound,
    /// Purchase order is not in a state that allows the operation
    PurchaseOrderState,
    /// More received than ordered
    OverReceipt,
    StockCountNotFound,
    /// Stock count already completed
    StockCountClosed,
    /// Quantity units cannot be converted
    UnitMismatch,
    /// Blocking stock policy refused a consumption
    InsufficientStock,
    /// A concurrent append advanced the ledger
    LedgerConflict,
    /// Hash chain verification failed
    LedgerTampered,

    // ==================== Recipes ====================
    MenuItemNotFound,
    RecipeNotFound,
    RecipeCycle,

    // ==================== Orders ====================
    PosSessionNotFound,
    PosSessionClosed,
    OrderNotFound,
    OrderItemNotFound,
    /// Order state machine would be violated
    OrderStateInvalid,
    /// Item already sent to the kitchen
    OrderItemSent,
    OrderEmpty,
    /// Order still has completed payments
    OrderHasPayments,
    /// Order is not fully settled
    OrderNotSettled,

    // ==================== Payments ====================
    PaymentNotFound,
    PaymentInvalidAmount,
    PaymentStateInvalid,
    SplitInvalid,
    /// Same idempotency key, different body
    IdempotencyConflict,

    // ==================== Kitchen display ====================
    TicketNotFound,
    TicketTransitionInvalid,
    UndoExpired,
    NothingToUndo,
    StationNotFound,

    // ==================== Observability ====================
    ErrorRecordNotFound,
    RetryNotAllowed,
    TokenNotFound,
    TokenUsed,
    TokenExpired,
    TokenUserMismatch,
    FieldNotEditable,
    PathNotAllowed,

    // ==================== Payroll ====================
    PayrollBandsMissing,

    // ==================== System ====================
    InternalError,
    DatabaseError,
    /// Downstream collaborator unavailable
    Dependency,
    TimeoutError,
}

impl ErrorCode {
    /// Wire representation, identical to the serde form
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::NotAuthenticated => "NOT_AUTHENTICATED",
            ErrorCode::SessionInvalid => "SESSION_INVALID",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::FeatureDisabled => "FEATURE_DISABLED",
            ErrorCode::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorCode::ItemArchived => "ITEM_ARCHIVED",
            ErrorCode::LotNotFound => "LOT_NOT_FOUND",
            ErrorCode::SupplierNotFound => "SUPPLIER_NOT_FOUND",
            ErrorCode::PurchaseOrderNotFound => "PURCHASE_ORDER_NOT_FOUND",
            ErrorCode::PurchaseOrderState => "PURCHASE_ORDER_STATE",
            ErrorCode::OverReceipt => "OVER_RECEIPT",
            ErrorCode::StockCountNotFound => "STOCK_COUNT_NOT_FOUND",
            ErrorCode::StockCountClosed => "STOCK_COUNT_CLOSED",
            ErrorCode::UnitMismatch => "UNIT_MISMATCH",
            ErrorCode::InsufficientStock => "INSUFFICIENT_STOCK",
            ErrorCode::LedgerConflict => "LEDGER_CONFLICT",
            ErrorCode::LedgerTampered => "LEDGER_TAMPERED",
            ErrorCode::MenuItemNotFound => "MENU_ITEM_NOT_FOUND",
            ErrorCode::RecipeNotFound => "RECIPE_NOT_FOUND",
            ErrorCode::RecipeCycle => "RECIPE_CYCLE",
            ErrorCode::PosSessionNotFound => "POS_SESSION_NOT_FOUND",
            ErrorCode::PosSessionClosed => "POS_SESSION_CLOSED",
            ErrorCode::OrderNotFound => "ORDER_NOT_FOUND",
            ErrorCode::OrderItemNotFound => "ORDER_ITEM_NOT_FOUND",
            ErrorCode::OrderStateInvalid => "ORDER_STATE_INVALID",
            ErrorCode::OrderItemSent => "ORDER_ITEM_SENT",
            ErrorCode::OrderEmpty => "ORDER_EMPTY",
            ErrorCode::OrderHasPayments => "ORDER_HAS_PAYMENTS",
            ErrorCode::OrderNotSettled => "ORDER_NOT_SETTLED",
            ErrorCode::PaymentNotFound => "PAYMENT_NOT_FOUND",
            ErrorCode::PaymentInvalidAmount => "PAYMENT_INVALID_AMOUNT",
            ErrorCode::PaymentStateInvalid => "PAYMENT_STATE_INVALID",
            ErrorCode::SplitInvalid => "SPLIT_INVALID",
            ErrorCode::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            ErrorCode::TicketNotFound => "TICKET_NOT_FOUND",
            ErrorCode::TicketTransitionInvalid => "TICKET_TRANSITION_INVALID",
            ErrorCode::UndoExpired => "UNDO_EXPIRED",
            ErrorCode::NothingToUndo => "NOTHING_TO_UNDO",
            ErrorCode::StationNotFound => "STATION_NOT_FOUND",
            ErrorCode::ErrorRecordNotFound => "ERROR_RECORD_NOT_FOUND",
            ErrorCode::RetryNotAllowed => "RETRY_NOT_ALLOWED",
            ErrorCode::TokenNotFound => "TOKEN_NOT_FOUND",
            ErrorCode::TokenUsed => "TOKEN_USED",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::TokenUserMismatch => "TOKEN_USER_MISMATCH",
            ErrorCode::FieldNotEditable => "FIELD_NOT_EDITABLE",
            ErrorCode::PathNotAllowed => "PATH_NOT_ALLOWED",
            ErrorCode::PayrollBandsMissing => "PAYROLL_BANDS_MISSING",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Dependency => "DEPENDENCY",
            ErrorCode::TimeoutError => "TIMEOUT_ERROR",
        }
    }

    /// Default human-readable message
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",

            // Auth
            ErrorCode::NotAuthenticated => "User is not authenticated",
            ErrorCode::SessionInvalid => "Authentication token is invalid",
            ErrorCode::SessionExpired => "Authentication token has expired",
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::FeatureDisabled => "Module is disabled for this venue",

            // Inventory
            ErrorCode::ItemNotFound => "Item not found",
            ErrorCode::ItemArchived => "Item is archived",
            ErrorCode::LotNotFound => "Lot not found",
            ErrorCode::SupplierNotFound => "Supplier not found",
            ErrorCode::PurchaseOrderNotFound => "Purchase order not found",
            ErrorCode::PurchaseOrderState => "Purchase order state does not allow this operation",
            ErrorCode::OverReceipt => "Received quantity exceeds ordered quantity",
            ErrorCode::StockCountNotFound => "Stock count not found",
            ErrorCode::StockCountClosed => "Stock count is already completed",
            ErrorCode::UnitMismatch => "Units are not convertible",
            ErrorCode::InsufficientStock => "Insufficient stock",
            ErrorCode::LedgerConflict => "Ledger was modified concurrently, retry",
            ErrorCode::LedgerTampered => "Ledger hash chain verification failed",

            // Recipes
            ErrorCode::MenuItemNotFound => "Menu item not found",
            ErrorCode::RecipeNotFound => "Recipe not found",
            ErrorCode::RecipeCycle => "Recipe references itself",

            // Orders
            ErrorCode::PosSessionNotFound => "POS session not found",
            ErrorCode::PosSessionClosed => "POS session is closed",
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::OrderItemNotFound => "Order item not found",
            ErrorCode::OrderStateInvalid => "Order state does not allow this operation",
            ErrorCode::OrderItemSent => "Order item has already been sent",
            ErrorCode::OrderEmpty => "Order has no items to send",
            ErrorCode::OrderHasPayments => "Order has completed payments",
            ErrorCode::OrderNotSettled => "Order is not fully settled",

            // Payments
            ErrorCode::PaymentNotFound => "Payment not found",
            ErrorCode::PaymentInvalidAmount => "Invalid payment amount",
            ErrorCode::PaymentStateInvalid => "Payment state does not allow this operation",
            ErrorCode::SplitInvalid => "Invalid split request",
            ErrorCode::IdempotencyConflict => "Idempotency key reused with a different request",

            // Kitchen display
            ErrorCode::TicketNotFound => "Ticket not found",
            ErrorCode::TicketTransitionInvalid => "Ticket transition is not allowed",
            ErrorCode::UndoExpired => "Undo window has expired",
            ErrorCode::NothingToUndo => "Nothing to undo",
            ErrorCode::StationNotFound => "Station not found",

            // Observability
            ErrorCode::ErrorRecordNotFound => "Error record not found",
            ErrorCode::RetryNotAllowed => "Error record cannot be retried",
            ErrorCode::TokenNotFound => "Action token not found",
            ErrorCode::TokenUsed => "Action token has already been used",
            ErrorCode::TokenExpired => "Action token has expired",
            ErrorCode::TokenUserMismatch => "Action token belongs to another user",
            ErrorCode::FieldNotEditable => "Field is not editable",
            ErrorCode::PathNotAllowed => "Replay target is not allowed",

            // Payroll
            ErrorCode::PayrollBandsMissing => "No tax bands configured for category",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::Dependency => "Downstream service unavailable",
            ErrorCode::TimeoutError => "Operation timed out",
        }
    }

    /// Error kind (taxonomy bucket) for this code
    pub const fn kind(&self) -> ErrorKind {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidRequest
            | ErrorCode::UnitMismatch
            | ErrorCode::PaymentInvalidAmount
            | ErrorCode::SplitInvalid
            | ErrorCode::FieldNotEditable => ErrorKind::Validation,

            ErrorCode::NotAuthenticated
            | ErrorCode::SessionInvalid
            | ErrorCode::SessionExpired
            | ErrorCode::PermissionDenied
            | ErrorCode::TokenUserMismatch
            | ErrorCode::PathNotAllowed => ErrorKind::Auth,

            ErrorCode::FeatureDisabled => ErrorKind::FeatureDisabled,

            ErrorCode::NotFound
            | ErrorCode::ItemNotFound
            | ErrorCode::LotNotFound
            | ErrorCode::SupplierNotFound
            | ErrorCode::PurchaseOrderNotFound
            | ErrorCode::StockCountNotFound
            | ErrorCode::MenuItemNotFound
            | ErrorCode::RecipeNotFound
            | ErrorCode::PosSessionNotFound
            | ErrorCode::OrderNotFound
            | ErrorCode::OrderItemNotFound
            | ErrorCode::PaymentNotFound
            | ErrorCode::TicketNotFound
            | ErrorCode::StationNotFound
            | ErrorCode::ErrorRecordNotFound
            | ErrorCode::TokenNotFound => ErrorKind::NotFound,

            ErrorCode::AlreadyExists | ErrorCode::IdempotencyConflict | ErrorCode::TokenUsed => {
                ErrorKind::Conflict
            }

            ErrorCode::ItemArchived
            | ErrorCode::PurchaseOrderState
            | ErrorCode::OverReceipt
            | ErrorCode::StockCountClosed
            | ErrorCode::RecipeCycle
            | ErrorCode::PosSessionClosed
            | ErrorCode::OrderStateInvalid
            | ErrorCode::OrderItemSent
            | ErrorCode::OrderEmpty
            | ErrorCode::OrderHasPayments
            | ErrorCode::OrderNotSettled
            | ErrorCode::PaymentStateInvalid
            | ErrorCode::TicketTransitionInvalid
            | ErrorCode::UndoExpired
            | ErrorCode::NothingToUndo
            | ErrorCode::RetryNotAllowed
            | ErrorCode::TokenExpired
            | ErrorCode::PayrollBandsMissing => ErrorKind::BusinessRule,

            ErrorCode::InsufficientStock => ErrorKind::InsufficientStock,
            ErrorCode::LedgerConflict => ErrorKind::LedgerConflict,
            ErrorCode::LedgerTampered => ErrorKind::LedgerTampered,
            ErrorCode::Dependency | ErrorCode::TimeoutError => ErrorKind::Dependency,
            ErrorCode::InternalError | ErrorCode::DatabaseError => ErrorKind::System,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
