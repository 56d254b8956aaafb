//! POS API: sessions, orders and tender
//!
//! | Path | Method | Handler |
//! |------|--------|---------|
//! | /api/pos/sessions | POST | open session |
//! | /api/pos/sessions/{id} | GET | get session |
//! | /api/pos/sessions/{id}/close | POST | close session |
//! | /api/pos/orders | GET, POST | list, create |
//! | /api/pos/orders/{id} | GET | get |
//! | /api/pos/orders/{id}/items | POST | add line |
//! | /api/pos/orders/{id}/items/{item_id} | DELETE | remove line |
//! | /api/pos/orders/{id}/send | POST | fire to kitchen |
//! | /api/pos/orders/{id}/void | POST | void |
//! | /api/pos/orders/{id}/close | POST | close |
//! | /api/pos/orders/{id}/payments | GET, POST | list, add payment |
//! | /api/pos/orders/{id}/split-equal | POST | equal split |
//! | /api/pos/orders/{id}/split-seat | POST | split by seat |
//! | /api/pos/payments/{id}/confirm | POST | processor outcome |
//! | /api/pos/payments/{id}/void | POST | void payment |
//! | /api/pos/payments/{id}/tips | POST | tip amendment |
//!
//! `Idempotency-Key` on payment requests takes precedence over the body key.

mod handler;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/pos", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/sessions", post(handler::open_session))
        .route("/sessions/{id}", get(handler::get_session))
        .route("/sessions/{id}/close", post(handler::close_session))
        .route("/orders", get(handler::list_orders).post(handler::create_order))
        .route("/orders/{id}", get(handler::get_order))
        .route("/orders/{id}/items", post(handler::add_item))
        .route("/orders/{id}/items/{item_id}", delete(handler::remove_item))
        .route("/orders/{id}/send", post(handler::send))
        .route("/orders/{id}/void", post(handler::void))
        .route("/orders/{id}/close", post(handler::close))
        .route(
            "/orders/{id}/payments",
            get(handler::list_payments).post(handler::add_payment),
        )
        .route("/orders/{id}/split-equal", post(handler::split_equal))
        .route("/orders/{id}/split-seat", post(handler::split_by_seat))
        .route("/payments/{id}/confirm", post(handler::confirm_payment))
        .route("/payments/{id}/void", post(handler::void_payment))
        .route("/payments/{id}/tips", post(handler::add_tip))
        .route_layer(middleware::from_fn(require_permission("pos:operate")))
}
