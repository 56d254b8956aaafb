//! KDS API
//!
//! | Path | Method | Handler |
//! |------|--------|---------|
//! | /api/kds/stations | GET | list stations |
//! | /api/kds/stations/{key} | PUT | create or update station |
//! | /api/kds/stations/{key}/bootstrap | GET | station with active tickets |
//! | /api/kds/stations/{key}/tickets | GET | active tickets |
//! | /api/kds/stations/{key}/stats | GET | prep statistics |
//! | /api/kds/tickets/{id} | GET | get ticket |
//! | /api/kds/tickets/{id}/bump | POST | forward transition |
//! | /api/kds/tickets/{id}/undo | POST | step back within the undo window |
//! | /api/kds/orders/{id}/tickets | GET | tickets of an order |

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};

use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/kds", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/stations", get(handler::list_stations))
        .route("/stations/{key}", put(handler::upsert_station))
        .route("/stations/{key}/bootstrap", get(handler::bootstrap))
        .route("/stations/{key}/tickets", get(handler::active_tickets))
        .route("/stations/{key}/stats", get(handler::stats))
        .route("/tickets/{id}", get(handler::get_ticket))
        .route("/tickets/{id}/bump", post(handler::bump))
        .route("/tickets/{id}/undo", post(handler::undo))
        .route("/orders/{id}/tickets", get(handler::order_tickets))
        .route_layer(middleware::from_fn(require_permission("kds:operate")))
}
