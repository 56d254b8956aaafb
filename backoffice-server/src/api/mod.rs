//! HTTP API
//!
//! # Structure
//!
//! - [`health`] - liveness, public
//! - [`inventory`] - items, lots, ledger, suppliers, purchase orders, counts, waste
//! - [`recipes`] - menu items, recipes, expansion and costing
//! - [`pos`] - sessions, orders, payments
//! - [`kds`] - stations and tickets
//! - [`observability`] - error inbox and replay
//! - [`payroll`] - net pay calculation
//!
//! Every handler checks venue access and the venue's feature switch before
//! touching an engine.

pub mod extract;
pub mod middleware;

pub mod health;
pub mod inventory;
pub mod kds;
pub mod observability;
pub mod payroll;
pub mod pos;
pub mod recipes;

use axum::Router;
use serde::Deserialize;
use shared::error::{AppError, AppResult};

use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;

pub use extract::{JsonBody, ValidatedJson};

/// All API routes, without state
pub fn router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(inventory::router())
        .merge(recipes::router())
        .merge(pos::router())
        .merge(kds::router())
        .merge(observability::router())
        .merge(payroll::router())
}

/// Refuse callers outside `venue_id` and switched-off modules
pub(crate) fn authorize(
    state: &ServerState,
    user: &CurrentUser,
    venue_id: &str,
    module: Module,
) -> AppResult<()> {
    if !user.can_access_venue(venue_id) {
        tracing::warn!(
            target: "security",
            user_id = %user.id,
            venue_id,
            "Cross-venue access refused"
        );
        return Err(AppError::permission_denied(format!(
            "No access to venue {venue_id}"
        )));
    }
    state.flags.require(venue_id, module)
}

/// `?venue_id=` defaulting to the caller's venue
#[derive(Debug, Default, Deserialize)]
pub struct VenueQuery {
    pub venue_id: Option<String>,
}

impl VenueQuery {
    pub fn resolve(&self, user: &CurrentUser) -> String {
        self.venue_id.clone().unwrap_or_else(|| user.venue_id.clone())
    }
}
