//! Data models
//!
//! Shared between the back-office server and its clients (via API).
//! Monetary amounts are `i64` minor units; stock quantities are `Decimal`.

pub mod inventory;
pub mod kds;
pub mod observability;
pub mod order;
pub mod payment;
pub mod payroll;
pub mod recipe;

// Re-exports
pub use inventory::*;
pub use kds::*;
pub use observability::*;
pub use order::*;
pub use payment::*;
pub use payroll::*;
pub use recipe::*;
