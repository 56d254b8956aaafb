//! Inventory API Handlers

use axum::extract::{Path, Query, State};
use http::StatusCode;
use serde::Deserialize;
use shared::error::{ApiResponse, AppResult};
use shared::models::{
    ChainVerification, CountLineInput, Item, ItemCreate, ItemUpdate, LedgerEntry, PurchaseOrder,
    PurchaseOrderCreate, ReceivePurchaseOrder, StockCount, StockCountStart, StockSnapshot,
    Supplier, SupplierCreate, WasteCreate, WasteRecord,
};

use crate::api::{JsonBody, ValidatedJson, VenueQuery, authorize};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;
use crate::observability::alerts::AlertKind;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct ListItemsQuery {
    pub venue_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub venue_id: Option<String>,
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Load an item and check the caller may touch its venue
fn scoped_item(state: &ServerState, user: &CurrentUser, item_id: &str) -> AppResult<Item> {
    let item = state.stock.get_item(item_id)?;
    authorize(state, user, &item.venue_id, Module::Inventory)?;
    Ok(item)
}

// ========== Items ==========

/// GET /api/inventory/items
pub async fn list_items(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<ListItemsQuery>,
) -> AppResult<ApiResponse<Vec<Item>>> {
    let venue_id = query.venue_id.clone().unwrap_or_else(|| user.venue_id.clone());
    authorize(&state, &user, &venue_id, Module::Inventory)?;
    let items = state.stock.list_items(&venue_id, query.include_archived)?;
    Ok(ApiResponse::new("items", items))
}

/// POST /api/inventory/items
pub async fn create_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<ItemCreate>,
) -> AppResult<(StatusCode, ApiResponse<Item>)> {
    authorize(&state, &user, &payload.venue_id, Module::Inventory)?;
    let item = state.stock.create_item(payload)?;
    tracing::info!(item_id = %item.id, user_id = %user.id, "Item created");
    Ok((StatusCode::CREATED, ApiResponse::new("item", item)))
}

/// GET /api/inventory/items/{id}
pub async fn get_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Item>> {
    let item = scoped_item(&state, &user, &id)?;
    Ok(ApiResponse::new("item", item))
}

/// PATCH /api/inventory/items/{id}
pub async fn update_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<ItemUpdate>,
) -> AppResult<ApiResponse<Item>> {
    scoped_item(&state, &user, &id)?;
    let item = state.stock.update_item(&id, payload)?;
    Ok(ApiResponse::new("item", item))
}

/// POST /api/inventory/items/{id}/archive
pub async fn archive_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Item>> {
    scoped_item(&state, &user, &id)?;
    let item = state.stock.archive_item(&id)?;
    tracing::info!(item_id = %id, user_id = %user.id, "Item archived");
    Ok(ApiResponse::new("item", item))
}

/// GET /api/inventory/items/{id}/stock
pub async fn snapshot(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<StockSnapshot>> {
    scoped_item(&state, &user, &id)?;
    Ok(ApiResponse::new("stock", state.stock.snapshot(&id)?))
}

/// GET /api/inventory/items/{id}/ledger
pub async fn ledger_tail(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> AppResult<ApiResponse<Vec<LedgerEntry>>> {
    scoped_item(&state, &user, &id)?;
    let entries = state.stock.ledger().tail(&id, query.limit())?;
    Ok(ApiResponse::new("entries", entries))
}

/// GET /api/inventory/items/{id}/verify
///
/// A broken chain is reported in the body and raised as an alert.
pub async fn verify(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ChainVerification>> {
    scoped_item(&state, &user, &id)?;
    let result = state.stock.ledger().verify(&id)?;
    if let Some(seq) = result.first_broken_seq {
        state.alerts.raise(
            AlertKind::LedgerTampered,
            id.clone(),
            format!("Ledger chain of item {id} broken at seq {seq}"),
        );
    }
    Ok(ApiResponse::new("verification", result))
}

// ========== Suppliers ==========

/// GET /api/inventory/suppliers
pub async fn list_suppliers(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<VenueQuery>,
) -> AppResult<ApiResponse<Vec<Supplier>>> {
    let venue_id = query.resolve(&user);
    authorize(&state, &user, &venue_id, Module::Inventory)?;
    Ok(ApiResponse::new("suppliers", state.stock.list_suppliers(&venue_id)?))
}

/// POST /api/inventory/suppliers
pub async fn create_supplier(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<SupplierCreate>,
) -> AppResult<(StatusCode, ApiResponse<Supplier>)> {
    authorize(&state, &user, &payload.venue_id, Module::Inventory)?;
    let supplier = state.stock.create_supplier(payload)?;
    Ok((StatusCode::CREATED, ApiResponse::new("supplier", supplier)))
}

// ========== Purchase orders ==========

fn scoped_po(state: &ServerState, user: &CurrentUser, po_id: &str) -> AppResult<PurchaseOrder> {
    let po = state.stock.get_purchase_order(po_id)?;
    authorize(state, user, &po.venue_id, Module::Inventory)?;
    Ok(po)
}

/// POST /api/inventory/purchase-orders
pub async fn create_purchase_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<PurchaseOrderCreate>,
) -> AppResult<(StatusCode, ApiResponse<PurchaseOrder>)> {
    authorize(&state, &user, &payload.venue_id, Module::Inventory)?;
    let po = state.stock.create_purchase_order(payload, &user.id)?;
    Ok((StatusCode::CREATED, ApiResponse::new("purchase_order", po)))
}

/// GET /api/inventory/purchase-orders/{id}
pub async fn get_purchase_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PurchaseOrder>> {
    Ok(ApiResponse::new("purchase_order", scoped_po(&state, &user, &id)?))
}

/// POST /api/inventory/purchase-orders/{id}/approve
pub async fn approve_purchase_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PurchaseOrder>> {
    scoped_po(&state, &user, &id)?;
    let po = state.stock.approve_purchase_order(&id)?;
    tracing::info!(po_id = %id, user_id = %user.id, "Purchase order approved");
    Ok(ApiResponse::new("purchase_order", po))
}

#[derive(Debug, serde::Serialize)]
pub struct ReceiptResponse {
    pub purchase_order: PurchaseOrder,
    pub lots: Vec<shared::models::Lot>,
}

/// POST /api/inventory/purchase-orders/{id}/receive
pub async fn receive_purchase_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<ReceivePurchaseOrder>,
) -> AppResult<ApiResponse<ReceiptResponse>> {
    scoped_po(&state, &user, &id)?;
    let (purchase_order, lots) = state.stock.receive_purchase_order(&id, payload)?;
    Ok(ApiResponse::new(
        "receipt",
        ReceiptResponse {
            purchase_order,
            lots,
        },
    ))
}

// ========== Stock counts ==========

fn scoped_count(state: &ServerState, user: &CurrentUser, count_id: &str) -> AppResult<StockCount> {
    let count = state.stock.get_count(count_id)?;
    authorize(state, user, &count.venue_id, Module::Inventory)?;
    Ok(count)
}

/// POST /api/inventory/counts
pub async fn start_count(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<StockCountStart>,
) -> AppResult<(StatusCode, ApiResponse<StockCount>)> {
    authorize(&state, &user, &payload.venue_id, Module::Inventory)?;
    let count = state.stock.start_count(&payload.venue_id, &user.id)?;
    Ok((StatusCode::CREATED, ApiResponse::new("count", count)))
}

/// GET /api/inventory/counts/{id}
pub async fn get_count(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<StockCount>> {
    Ok(ApiResponse::new("count", scoped_count(&state, &user, &id)?))
}

/// POST /api/inventory/counts/{id}/lines
pub async fn submit_count_line(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<CountLineInput>,
) -> AppResult<ApiResponse<StockCount>> {
    scoped_count(&state, &user, &id)?;
    let count = state.stock.submit_count_line(&id, payload)?;
    Ok(ApiResponse::new("count", count))
}

/// POST /api/inventory/counts/{id}/complete
pub async fn complete_count(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<StockCount>> {
    scoped_count(&state, &user, &id)?;
    let count = state.stock.complete_count(&id)?;
    tracing::info!(count_id = %id, adjustments = count.adjustments, "Stock count completed");
    Ok(ApiResponse::new("count", count))
}

// ========== Waste ==========

/// GET /api/inventory/waste
pub async fn list_waste(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<ApiResponse<Vec<WasteRecord>>> {
    let venue_id = query.venue_id.clone().unwrap_or_else(|| user.venue_id.clone());
    authorize(&state, &user, &venue_id, Module::Inventory)?;
    let records = state.stock.list_waste(&venue_id, query.limit())?;
    Ok(ApiResponse::new("waste", records))
}

/// POST /api/inventory/waste
pub async fn log_waste(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<WasteCreate>,
) -> AppResult<(StatusCode, ApiResponse<WasteRecord>)> {
    scoped_item(&state, &user, &payload.item_id)?;
    let record = state.stock.log_waste(payload, &user.id)?;
    Ok((StatusCode::CREATED, ApiResponse::new("waste", record)))
}
