//! Error kind classification

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Taxonomy bucket of an error; decides the HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed or semantically invalid input (400)
    Validation,
    /// Missing, invalid or insufficient credentials (401/403)
    Auth,
    /// Resource does not exist (404)
    NotFound,
    /// Duplicate or concurrent write (409)
    Conflict,
    /// Operation not allowed in the current state (422)
    BusinessRule,
    /// Blocking stock policy refused a consumption (422)
    InsufficientStock,
    /// Ledger tail moved under us (409)
    LedgerConflict,
    /// Hash chain broken (500)
    LedgerTampered,
    /// Module switched off for the venue (403)
    FeatureDisabled,
    /// Downstream collaborator failed (503)
    Dependency,
    /// Anything else (500)
    System,
}

impl ErrorKind {
    pub const fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Auth => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::LedgerConflict => StatusCode::CONFLICT,
            ErrorKind::BusinessRule | ErrorKind::InsufficientStock => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorKind::FeatureDisabled => StatusCode::FORBIDDEN,
            ErrorKind::Dependency => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::LedgerTampered | ErrorKind::System => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this kind should be logged at error level
    pub const fn is_server_fault(&self) -> bool {
        matches!(
            self,
            ErrorKind::LedgerTampered | ErrorKind::System | ErrorKind::Dependency
        )
    }
}
