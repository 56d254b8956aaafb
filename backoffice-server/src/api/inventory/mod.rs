//! Inventory API
//!
//! | Path | Method | Handler |
//! |------|--------|---------|
//! | /api/inventory/items | GET, POST | list, create |
//! | /api/inventory/items/{id} | GET, PATCH | get, update |
//! | /api/inventory/items/{id}/archive | POST | archive |
//! | /api/inventory/items/{id}/stock | GET | snapshot |
//! | /api/inventory/items/{id}/ledger | GET | ledger tail |
//! | /api/inventory/items/{id}/verify | GET | chain verification |
//! | /api/inventory/suppliers | GET, POST | suppliers |
//! | /api/inventory/purchase-orders | POST | create PO |
//! | /api/inventory/purchase-orders/{id} | GET | get PO |
//! | /api/inventory/purchase-orders/{id}/approve | POST | approve |
//! | /api/inventory/purchase-orders/{id}/receive | POST | goods receipt |
//! | /api/inventory/counts | POST | start count |
//! | /api/inventory/counts/{id} | GET | get count |
//! | /api/inventory/counts/{id}/lines | POST | submit line |
//! | /api/inventory/counts/{id}/complete | POST | complete |
//! | /api/inventory/waste | GET, POST | waste log |

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/inventory", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/items", get(handler::list_items).post(handler::create_item))
        .route("/items/{id}", get(handler::get_item).patch(handler::update_item))
        .route("/items/{id}/archive", post(handler::archive_item))
        .route("/items/{id}/stock", get(handler::snapshot))
        .route("/items/{id}/ledger", get(handler::ledger_tail))
        .route("/items/{id}/verify", get(handler::verify))
        .route(
            "/suppliers",
            get(handler::list_suppliers).post(handler::create_supplier),
        )
        .route("/purchase-orders", post(handler::create_purchase_order))
        .route("/purchase-orders/{id}", get(handler::get_purchase_order))
        .route(
            "/purchase-orders/{id}/approve",
            post(handler::approve_purchase_order),
        )
        .route(
            "/purchase-orders/{id}/receive",
            post(handler::receive_purchase_order),
        )
        .route("/counts", post(handler::start_count))
        .route("/counts/{id}", get(handler::get_count))
        .route("/counts/{id}/lines", post(handler::submit_count_line))
        .route("/counts/{id}/complete", post(handler::complete_count))
        .route("/waste", get(handler::list_waste).post(handler::log_waste))
        .route_layer(middleware::from_fn(require_permission("inventory:manage")))
}
