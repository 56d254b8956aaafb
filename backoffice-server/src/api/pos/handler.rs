//! POS API Handlers

use axum::extract::{Path, Query, State};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use shared::error::{ApiResponse, AppResult};
use shared::models::{
    AddItem, AddPayment, AddTip, ConfirmPayment, CreateOrder, OpenSession, Order, OrderStatus,
    Payment, PosSession, SplitBySeat, SplitEqual, TipRecord, VoidOrder,
};
use validator::Validate;

use crate::api::extract::validation_error;
use crate::api::{JsonBody, ValidatedJson, authorize};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;
use crate::observability::replay::IDEMPOTENCY_HEADER;

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub venue_id: Option<String>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResult {
    pub payment: Payment,
    pub order: Order,
}

#[derive(Debug, Serialize)]
pub struct SplitResult {
    pub payments: Vec<Payment>,
    pub order: Order,
}

fn scoped_order(state: &ServerState, user: &CurrentUser, order_id: &str) -> AppResult<Order> {
    let order = state.orders.get_order(order_id)?;
    authorize(state, user, &order.venue_id, Module::Pos)?;
    Ok(order)
}

fn scoped_payment(state: &ServerState, user: &CurrentUser, payment_id: &str) -> AppResult<Payment> {
    let payment = state.tender.get_payment(payment_id)?;
    scoped_order(state, user, &payment.order_id)?;
    Ok(payment)
}

fn header_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// ========== Sessions ==========

/// POST /api/pos/sessions
pub async fn open_session(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<OpenSession>,
) -> AppResult<(StatusCode, ApiResponse<PosSession>)> {
    authorize(&state, &user, &payload.venue_id, Module::Pos)?;
    let session = state.orders.open_session(&payload.venue_id, &user.id)?;
    Ok((StatusCode::CREATED, ApiResponse::new("session", session)))
}

/// GET /api/pos/sessions/{id}
pub async fn get_session(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PosSession>> {
    let session = state.orders.get_session(&id)?;
    authorize(&state, &user, &session.venue_id, Module::Pos)?;
    Ok(ApiResponse::new("session", session))
}

/// POST /api/pos/sessions/{id}/close
pub async fn close_session(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PosSession>> {
    let session = state.orders.get_session(&id)?;
    authorize(&state, &user, &session.venue_id, Module::Pos)?;
    Ok(ApiResponse::new("session", state.orders.close_session(&id)?))
}

// ========== Orders ==========

/// GET /api/pos/orders
pub async fn list_orders(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> AppResult<ApiResponse<Vec<Order>>> {
    let venue_id = query.venue_id.clone().unwrap_or_else(|| user.venue_id.clone());
    authorize(&state, &user, &venue_id, Module::Pos)?;
    let orders = state.orders.list_orders(&venue_id, query.status)?;
    Ok(ApiResponse::new("orders", orders))
}

/// POST /api/pos/orders
pub async fn create_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    ValidatedJson(payload): ValidatedJson<CreateOrder>,
) -> AppResult<(StatusCode, ApiResponse<Order>)> {
    let session = state.orders.get_session(&payload.session_id)?;
    authorize(&state, &user, &session.venue_id, Module::Pos)?;
    let order = state.orders.create_order(payload, &user.id)?;
    Ok((StatusCode::CREATED, ApiResponse::new("order", order)))
}

/// GET /api/pos/orders/{id}
pub async fn get_order(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Order>> {
    Ok(ApiResponse::new("order", scoped_order(&state, &user, &id)?))
}

/// POST /api/pos/orders/{id}/items
pub async fn add_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<AddItem>,
) -> AppResult<ApiResponse<Order>> {
    scoped_order(&state, &user, &id)?;
    Ok(ApiResponse::new("order", state.orders.add_item(&id, payload)?))
}

/// DELETE /api/pos/orders/{id}/items/{item_id}
pub async fn remove_item(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path((id, item_id)): Path<(String, String)>,
) -> AppResult<ApiResponse<Order>> {
    scoped_order(&state, &user, &id)?;
    Ok(ApiResponse::new("order", state.orders.remove_item(&id, &item_id)?))
}

/// POST /api/pos/orders/{id}/send
///
/// Consumes stock for every unsent line and creates kitchen tickets, in one
/// transaction.
pub async fn send(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Order>> {
    scoped_order(&state, &user, &id)?;
    let order = state.orders.send(&id)?;
    tracing::info!(order_id = %id, user_id = %user.id, "Order sent");
    Ok(ApiResponse::new("order", order))
}

/// POST /api/pos/orders/{id}/void
pub async fn void(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<VoidOrder>,
) -> AppResult<ApiResponse<Order>> {
    scoped_order(&state, &user, &id)?;
    let order = state.orders.void(&id, payload, &user.id)?;
    tracing::info!(order_id = %id, user_id = %user.id, "Order voided");
    Ok(ApiResponse::new("order", order))
}

/// POST /api/pos/orders/{id}/close
pub async fn close(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Order>> {
    scoped_order(&state, &user, &id)?;
    Ok(ApiResponse::new("order", state.orders.close(&id)?))
}

// ========== Tender ==========

/// GET /api/pos/orders/{id}/payments
pub async fn list_payments(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<Payment>>> {
    scoped_order(&state, &user, &id)?;
    Ok(ApiResponse::new("payments", state.tender.list_payments(&id)?))
}

/// POST /api/pos/orders/{id}/payments
pub async fn add_payment(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(mut payload): JsonBody<AddPayment>,
) -> AppResult<ApiResponse<PaymentResult>> {
    if let Some(key) = header_key(&headers) {
        payload.idempotency_key = key;
    }
    payload.validate().map_err(validation_error)?;
    scoped_order(&state, &user, &id)?;

    let (payment, order) = state.tender.add_payment(&id, payload, &user.id)?;
    Ok(ApiResponse::new("result", PaymentResult { payment, order }))
}

/// POST /api/pos/orders/{id}/split-equal
pub async fn split_equal(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(mut payload): JsonBody<SplitEqual>,
) -> AppResult<ApiResponse<SplitResult>> {
    if let Some(key) = header_key(&headers) {
        payload.idempotency_key = key;
    }
    payload.validate().map_err(validation_error)?;
    scoped_order(&state, &user, &id)?;

    let (payments, order) = state.tender.split_equal(&id, payload, &user.id)?;
    Ok(ApiResponse::new("result", SplitResult { payments, order }))
}

/// POST /api/pos/orders/{id}/split-seat
pub async fn split_by_seat(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    JsonBody(mut payload): JsonBody<SplitBySeat>,
) -> AppResult<ApiResponse<SplitResult>> {
    if let Some(key) = header_key(&headers) {
        payload.idempotency_key = key;
    }
    payload.validate().map_err(validation_error)?;
    scoped_order(&state, &user, &id)?;

    let (payments, order) = state.tender.split_by_seat(&id, payload, &user.id)?;
    Ok(ApiResponse::new("result", SplitResult { payments, order }))
}

/// POST /api/pos/payments/{id}/confirm
pub async fn confirm_payment(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    JsonBody(payload): JsonBody<ConfirmPayment>,
) -> AppResult<ApiResponse<PaymentResult>> {
    scoped_payment(&state, &user, &id)?;
    let (payment, order) = state.tender.confirm_payment(&id, payload.success)?;
    Ok(ApiResponse::new("result", PaymentResult { payment, order }))
}

/// POST /api/pos/payments/{id}/void
pub async fn void_payment(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<PaymentResult>> {
    scoped_payment(&state, &user, &id)?;
    let (payment, order) = state.tender.void_payment(&id)?;
    tracing::info!(payment_id = %id, user_id = %user.id, "Payment voided");
    Ok(ApiResponse::new("result", PaymentResult { payment, order }))
}

/// POST /api/pos/payments/{id}/tips
pub async fn add_tip(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<AddTip>,
) -> AppResult<(StatusCode, ApiResponse<TipRecord>)> {
    scoped_payment(&state, &user, &id)?;
    let tip = state.tender.add_tip(&id, payload, &user.id)?;
    Ok((StatusCode::CREATED, ApiResponse::new("tip", tip)))
}
