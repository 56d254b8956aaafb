//! Payroll API
//!
//! | Path | Method | Handler |
//! |------|--------|---------|
//! | /api/payroll/compute | POST | net pay breakdown |

mod handler;

use axum::{Router, middleware, routing::post};

use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/payroll", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/compute", post(handler::compute))
        .route_layer(middleware::from_fn(require_permission("payroll:compute")))
}
