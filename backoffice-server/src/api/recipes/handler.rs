//! Recipes API Handlers

use axum::extract::{Path, Query, State};
use http::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::error::{ApiResponse, AppError, AppResult};
use shared::models::{ExpandedLine, MenuItem, MenuItemCreate, Recipe, RecipeCost, RecipeCreate};

use crate::api::{ValidatedJson, VenueQuery, authorize};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;

#[derive(Debug, Default, Deserialize)]
pub struct QtyQuery {
    pub qty: Option<Decimal>,
}

impl QtyQuery {
    fn qty(&self) -> AppResult<Decimal> {
        let qty = self.qty.unwrap_or(Decimal::ONE);
        if qty <= Decimal::ZERO {
            return Err(AppError::invalid_field("qty", "must be positive"));
        }
        Ok(qty)
    }
}

fn scoped_menu_item(state: &ServerState, user: &CurrentUser, id: &str) -> AppResult<MenuItem> {
    let menu_item = state.recipes.get_menu_item(id)?;
    authorize(state, user, &menu_item.venue_id, Module::Recipes)?;
    Ok(menu_item)
}

/// GET /api/recipes/menu-items
pub async fn list_menu_items(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<VenueQuery>,
) -> AppResult<ApiResponse<Vec<MenuItem>>> {
    let venue_id = query.resolve(&user);
    authorize(&state, &user, &venue_id, Module::Recipes)?;
    Ok(ApiResponse::new("menu_items", state.recipes.list_menu_items(&venue_id)?))
}

/// POST /api/recipes/menu-items
pub async fn create_menu_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<MenuItemCreate>,
) -> AppResult<(StatusCode, ApiResponse<MenuItem>)> {
    authorize(&state, &user, &payload.venue_id, Module::Recipes)?;
    let menu_item = state.recipes.create_menu_item(payload)?;
    Ok((StatusCode::CREATED, ApiResponse::new("menu_item", menu_item)))
}

/// GET /api/recipes/menu-items/{id}
pub async fn get_menu_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<MenuItem>> {
    Ok(ApiResponse::new("menu_item", scoped_menu_item(&state, &user, &id)?))
}

/// GET /api/recipes/menu-items/{id}/expand?qty=
pub async fn expand(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<QtyQuery>,
) -> AppResult<ApiResponse<Vec<ExpandedLine>>> {
    scoped_menu_item(&state, &user, &id)?;
    let lines = state.recipes.expand(&id, query.qty()?)?;
    Ok(ApiResponse::new("lines", lines))
}

/// GET /api/recipes/menu-items/{id}/cost?qty=
pub async fn cost(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<QtyQuery>,
) -> AppResult<ApiResponse<RecipeCost>> {
    scoped_menu_item(&state, &user, &id)?;
    Ok(ApiResponse::new("cost", state.recipes.cost(&id, query.qty()?)?))
}

/// POST /api/recipes/recipes
pub async fn save_recipe(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<RecipeCreate>,
) -> AppResult<ApiResponse<Recipe>> {
    authorize(&state, &user, &payload.venue_id, Module::Recipes)?;
    let recipe = state.recipes.save_recipe(payload)?;
    tracing::info!(recipe_id = %recipe.id, user_id = %user.id, "Recipe saved");
    Ok(ApiResponse::new("recipe", recipe))
}

/// GET /api/recipes/recipes/{id}
pub async fn get_recipe(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Recipe>> {
    let recipe = state.recipes.get_recipe(&id)?;
    authorize(&state, &user, &recipe.venue_id, Module::Recipes)?;
    Ok(ApiResponse::new("recipe", recipe))
}
