//! KDS API Handlers

use axum::extract::{Path, Query, State};
use shared::error::{ApiResponse, AppResult};
use shared::models::{
    BumpTicket, Station, StationBootstrap, StationStats, StationUpsert, Ticket, UndoTicket,
};

use crate::api::{ValidatedJson, VenueQuery, authorize};
use crate::auth::CurrentUser;
use crate::core::ServerState;
use crate::features::Module;

fn scoped_ticket(state: &ServerState, user: &CurrentUser, ticket_id: &str) -> AppResult<Ticket> {
    let ticket = state.kds.get_ticket(ticket_id)?;
    authorize(state, user, &ticket.venue_id, Module::Kds)?;
    Ok(ticket)
}

/// GET /api/kds/stations
pub async fn list_stations(
    State(state): State<ServerState>,
    user: CurrentUser,
    Query(query): Query<VenueQuery>,
) -> AppResult<ApiResponse<Vec<Station>>> {
    let venue_id = query.resolve(&user);
    authorize(&state, &user, &venue_id, Module::Kds)?;
    Ok(ApiResponse::new("stations", state.kds.list_stations(&venue_id)?))
}

/// PUT /api/kds/stations/{key}
pub async fn upsert_station(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(key): Path<String>,
    ValidatedJson(payload): ValidatedJson<StationUpsert>,
) -> AppResult<ApiResponse<Station>> {
    authorize(&state, &user, &payload.venue_id, Module::Kds)?;
    let station = state.kds.upsert_station(&key, payload)?;
    tracing::info!(station_key = %key, venue_id = %station.venue_id, "Station saved");
    Ok(ApiResponse::new("station", station))
}

/// GET /api/kds/stations/{key}/bootstrap
pub async fn bootstrap(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Query(query): Query<VenueQuery>,
) -> AppResult<ApiResponse<StationBootstrap>> {
    let venue_id = query.resolve(&user);
    authorize(&state, &user, &venue_id, Module::Kds)?;
    Ok(ApiResponse::new("bootstrap", state.kds.bootstrap(&venue_id, &key)?))
}

/// GET /api/kds/stations/{key}/tickets
pub async fn active_tickets(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Query(query): Query<VenueQuery>,
) -> AppResult<ApiResponse<Vec<Ticket>>> {
    let venue_id = query.resolve(&user);
    authorize(&state, &user, &venue_id, Module::Kds)?;
    let station = state.kds.station(&venue_id, &key)?;
    Ok(ApiResponse::new("tickets", state.kds.active_tickets(&station)?))
}

/// GET /api/kds/stations/{key}/stats
pub async fn stats(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(key): Path<String>,
    Query(query): Query<VenueQuery>,
) -> AppResult<ApiResponse<StationStats>> {
    let venue_id = query.resolve(&user);
    authorize(&state, &user, &venue_id, Module::Kds)?;
    Ok(ApiResponse::new("stats", state.kds.stats(&venue_id, &key)?))
}

/// GET /api/kds/tickets/{id}
pub async fn get_ticket(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Ticket>> {
    Ok(ApiResponse::new("ticket", scoped_ticket(&state, &user, &id)?))
}

/// POST /api/kds/tickets/{id}/bump
pub async fn bump(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<BumpTicket>,
) -> AppResult<ApiResponse<Ticket>> {
    scoped_ticket(&state, &user, &id)?;
    let ticket = state.kds.bump(&id, &payload, &user.id, shared::util::now())?;
    Ok(ApiResponse::new("ticket", ticket))
}

/// POST /api/kds/tickets/{id}/undo
pub async fn undo(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ValidatedJson(payload): ValidatedJson<UndoTicket>,
) -> AppResult<ApiResponse<Ticket>> {
    scoped_ticket(&state, &user, &id)?;
    let ticket = state.kds.undo(&id, &payload, &user.id, shared::util::now())?;
    Ok(ApiResponse::new("ticket", ticket))
}

/// GET /api/kds/orders/{id}/tickets
pub async fn order_tickets(
    State(state): State<ServerState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<Ticket>>> {
    let order = state.orders.get_order(&id)?;
    authorize(&state, &user, &order.venue_id, Module::Kds)?;
    Ok(ApiResponse::new("tickets", state.kds.tickets_for_order(&id)?))
}
