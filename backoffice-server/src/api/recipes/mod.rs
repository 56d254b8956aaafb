//! Recipes API
//!
//! | Path | Method | Handler |
//! |------|--------|---------|
//! | /api/recipes/menu-items | GET, POST | list, create |
//! | /api/recipes/menu-items/{id} | GET | get |
//! | /api/recipes/menu-items/{id}/expand | GET | ingredient expansion |
//! | /api/recipes/menu-items/{id}/cost | GET | costing |
//! | /api/recipes/recipes | POST | save recipe |
//! | /api/recipes/recipes/{id} | GET | get recipe |

mod handler;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::require_permission;
use crate::core::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/api/recipes", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route(
            "/menu-items",
            get(handler::list_menu_items).post(handler::create_menu_item),
        )
        .route("/menu-items/{id}", get(handler::get_menu_item))
        .route("/menu-items/{id}/expand", get(handler::expand))
        .route("/menu-items/{id}/cost", get(handler::cost))
        .route("/recipes", post(handler::save_recipe))
        .route("/recipes/{id}", get(handler::get_recipe))
        .route_layer(middleware::from_fn(require_permission("recipes:manage")))
}
