//! Error inbox API
//!
//! | Path | Method | Handler |
//! |------|--------|---------|
//! | /api/observability/errors | GET | filtered inbox |
//! | /api/observability/errors/{id} | GET | record detail |
//! | /api/observability/errors/{id}/token | POST | mint action token |
//! | /api/observability/errors/{id}/retry | POST | replay with token |
//! | /api/observability/errors/{id}/ack | POST | acknowledge |
//! | /api/observability/errors/{id}/suppress | POST | suppress |
//!
//! These routes are never captured themselves.

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/observability", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/errors", get(handler::list))
        .route("/errors/{id}", get(handler::get))
        .route("/errors/{id}/token", post(handler::mint_token))
        .route("/errors/{id}/retry", post(handler::retry))
        .route("/errors/{id}/ack", post(handler::acknowledge))
        .route("/errors/{id}/suppress", post(handler::suppress))
        .route_layer(middleware::from_fn(require_permission(
            "observability:manage",
        )))
}
