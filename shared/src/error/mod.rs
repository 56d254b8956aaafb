//! Unified error system for the back-office platform
//!
//! - [`ErrorCode`]: Standardized error codes for all domains
//! - [`ErrorKind`]: Taxonomy bucket, decides the HTTP status
//! - [`AppError`]: Error with code, message and field-level details
//! - [`ApiResponse`]: Success envelope `{ ok: true, <entity>: ... }`
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorCode};
//!
//! let err = AppError::new(ErrorCode::OrderNotFound);
//! let err = AppError::validation("Invalid quantity").with_detail("lines.0.qty", "must be positive");
//! ```

mod codes;
mod kind;
mod types;

pub use codes::ErrorCode;
pub use kind::ErrorKind;
pub use types::{ApiResponse, AppError, AppResult, ErrorBody, ErrorDetail};
