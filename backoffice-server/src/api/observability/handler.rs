//! Error inbox API Handlers

use axum::extract::{Path, Query, State};
use http::HeaderMap;
use shared::error::{ApiResponse, AppResult};
use shared::models::{ActionToken, ErrorRecord, InboxPage, InboxQuery, RetryOutcome, RetryRequest};
use validator::Validate;

use crate::api::extract::validation_error;
use crate::api::{ValidatedJson, authorize};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;

fn scoped_record(state: &ServerState, user: &CurrentUser, error_id: &str) -> AppResult<ErrorRecord> {
    let record = state.inbox.get(error_id)?;
    authorize(state, user, &record.venue_id, Module::Observability)?;
    Ok(record)
}

/// GET /api/observability/errors
pub async fn list(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<InboxQuery>,
) -> AppResult<ApiResponse<InboxPage>> {
    query.validate().map_err(validation_error)?;
    authorize(&state, &user, &query.venue_id, Module::Observability)?;
    Ok(ApiResponse::new("page", state.inbox.list(&query)?))
}

/// GET /api/observability/errors/{id}
pub async fn get(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ErrorRecord>> {
    Ok(ApiResponse::new("error", scoped_record(&state, &user, &id)?))
}

/// POST /api/observability/errors/{id}/token
pub async fn mint_token(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ActionToken>> {
    scoped_record(&state, &user, &id)?;
    Ok(ApiResponse::new("token", state.inbox.mint_token(&id, &user.id)?))
}

/// POST /api/observability/errors/{id}/retry
///
/// The replay runs with the operator's own credentials.
pub async fn retry(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    headers: HeaderMap,
    ValidatedJson(payload): ValidatedJson<RetryRequest>,
) -> AppResult<ApiResponse<RetryOutcome>> {
    scoped_record(&state, &user, &id)?;
    let authorization = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state
        .inbox
        .retry(&id, &payload, &user.id, authorization)
        .await?;
    Ok(ApiResponse::new("outcome", outcome))
}

/// POST /api/observability/errors/{id}/ack
pub async fn acknowledge(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ErrorRecord>> {
    scoped_record(&state, &user, &id)?;
    Ok(ApiResponse::new("error", state.inbox.acknowledge(&id, &user.id)?))
}

/// POST /api/observability/errors/{id}/suppress
pub async fn suppress(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<ErrorRecord>> {
    scoped_record(&state, &user, &id)?;
    Ok(ApiResponse::new("error", state.inbox.suppress(&id, &user.id)?))
}
