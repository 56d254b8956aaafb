//! Hospitality back-office server
//!
//! # Overview
//!
//! - **Ledger** (`ledger`): append-only, hash-chained stock ledger per item
//! - **Stock** (`stock`): lots, FIFO consumption, procurement, counts, waste
//! - **Recipes** (`recipes`): menu items and recursive ingredient expansion
//! - **Orders** (`orders`): POS sessions and the order state machine
//! - **Tender** (`tender`): idempotent payments, splits and tips
//! - **KDS** (`kds`): kitchen tickets with bump and undo
//! - **Observability** (`observability`): error inbox and token-gated replay
//! - **Payroll** (`payroll`): Malta net pay calculation
//!
//! # Layout
//!
//! ```text
//! backoffice-server/src/
//! ├── core/           # config, state, server, background tasks
//! ├── auth/           # JWT verification, permission guards
//! ├── api/            # HTTP routes, handlers and middleware
//! ├── db/             # redb document store, tables, idempotency
//! ├── ledger/ stock/ recipes/ orders/ tender/ kds/
//! ├── observability/  # capture, replay, tokens, alerts
//! ├── payroll/
//! └── utils/          # logging
//! ```

pub mod api;
pub mod auth;
pub mod core;
pub mod db;
pub mod features;
pub mod kds;
pub mod ledger;
pub mod observability;
pub mod orders;
pub mod payroll;
pub mod recipes;
pub mod stock;
pub mod tender;
pub mod utils;

pub use auth::{CurrentUser, JwtService};
pub use core::{Config, Server, ServerState, build_app};
pub use utils::init_logger;
