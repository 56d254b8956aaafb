//! Payroll API Handlers

use axum::extract::State;
use shared::error::{ApiResponse, AppResult};
use shared::models::{PayrollRequest, PayrollResponse};

use crate::api::{JsonBody, authorize};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;
use crate::payroll;

/// POST /api/payroll/compute
///
/// Bands from the request win over the configured defaults.
pub async fn compute(
    State(state): State<ServerState>,
    user: CurrentUser,
    JsonBody(payload): JsonBody<PayrollRequest>,
) -> AppResult<ApiResponse<PayrollResponse>> {
    authorize(&state, &user, &user.venue_id, Module::Payroll)?;
    let response = payroll::compute(&payload, state.payroll.as_deref())?;
    Ok(ApiResponse::new("payroll", response))
}
