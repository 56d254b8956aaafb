//! Kitchen display routing and ticket lifecycle
//!
//! Sent order items are grouped by prep area into one ticket per area per
//! send batch. Tickets move strictly one step forward per bump; an undo
//! steps back once and is only accepted within the station's undo window,
//! measured from the ticket's latest transition.

mod routing;

use chrono::{DateTime, Duration, Utc};
use redb::{ReadableTable, WriteTransaction};
use shared::error::{AppError, ErrorCode};
use shared::models::{
    BumpTicket, PrepArea, Station, StationBootstrap, StationStats, StationUpsert,
    StateTransition, Ticket, TicketStatus, UndoTicket,
};
use thiserror::Error;

use crate::db::tables::{STATIONS, TICKET_OPS, TICKETS, TICKETS_BY_ORDER, TICKETS_BY_VENUE};
use crate::db::{Storage, StorageError, get_doc, put_doc};

pub use routing::{create_tickets, withdraw_for_order};

#[derive(Debug, Error)]
pub enum KdsError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Station not found: {0}")]
    StationNotFound(String),

    #[error("Cannot move ticket from {from} to {to}")]
    Transition { from: TicketStatus, to: TicketStatus },

    #[error("Undo window of {window_seconds}s has elapsed for ticket {ticket_id}")]
    UndoExpired {
        ticket_id: String,
        window_seconds: u32,
    },

    #[error("Nothing to undo on ticket {0}")]
    NothingToUndo(String),
}

impl From<redb::TableError> for KdsError {
    fn from(e: redb::TableError) -> Self {
        KdsError::Storage(e.into())
    }
}

impl From<redb::StorageError> for KdsError {
    fn from(e: redb::StorageError) -> Self {
        KdsError::Storage(e.into())
    }
}

impl From<serde_json::Error> for KdsError {
    fn from(e: serde_json::Error) -> Self {
        KdsError::Storage(e.into())
    }
}

pub type KdsResult<T> = Result<T, KdsError>;

impl From<KdsError> for AppError {
    fn from(err: KdsError) -> Self {
        let message = err.to_string();
        match err {
            KdsError::Storage(e) => e.into(),
            KdsError::TicketNotFound(_) => AppError::with_message(ErrorCode::TicketNotFound, message),
            KdsError::StationNotFound(_) => {
                AppError::with_message(ErrorCode::StationNotFound, message)
            }
            KdsError::Transition { .. } => {
                AppError::with_message(ErrorCode::TicketTransitionInvalid, message)
            }
            KdsError::UndoExpired { .. } => AppError::with_message(ErrorCode::UndoExpired, message),
            KdsError::NothingToUndo(_) => AppError::with_message(ErrorCode::NothingToUndo, message),
        }
    }
}

/// Index key status component
fn status_key(status: TicketStatus) -> &'static str {
    status.as_str()
}

/// Status an undo returns to
fn previous(status: TicketStatus) -> Option<TicketStatus> {
    match status {
        TicketStatus::Preparing => Some(TicketStatus::New),
        TicketStatus::Ready => Some(TicketStatus::Preparing),
        TicketStatus::Completed => Some(TicketStatus::Ready),
        TicketStatus::New | TicketStatus::Withdrawn => None,
    }
}

/// Persist a ticket and move its venue/status index row
pub(crate) fn save_ticket(
    txn: &WriteTransaction,
    ticket: &Ticket,
    old_status: Option<TicketStatus>,
) -> KdsResult<()> {
    let mut table = txn.open_table(TICKETS)?;
    put_doc(&mut table, &ticket.id, ticket)?;

    let created_ms = ticket.created_at.timestamp_millis();
    let mut index = txn.open_table(TICKETS_BY_VENUE)?;
    if let Some(old) = old_status {
        index.remove((
            ticket.venue_id.as_str(),
            status_key(old),
            created_ms,
            ticket.id.as_str(),
        ))?;
    }
    index.insert(
        (
            ticket.venue_id.as_str(),
            status_key(ticket.status),
            created_ms,
            ticket.id.as_str(),
        ),
        (),
    )?;
    Ok(())
}

#[derive(Clone)]
pub struct KdsRouter {
    storage: Storage,
    default_undo_window: u32,
}

impl KdsRouter {
    pub fn new(storage: Storage, default_undo_window: u32) -> Self {
        Self {
            storage,
            default_undo_window,
        }
    }

    // ========== Stations ==========

    pub fn upsert_station(&self, key: &str, input: StationUpsert) -> KdsResult<Station> {
        let station = Station {
            key: key.to_string(),
            venue_id: input.venue_id,
            name: input.name,
            prep_areas: input.prep_areas,
            undo_window_seconds: input
                .undo_window_seconds
                .unwrap_or(self.default_undo_window),
        };
        let txn = self.storage.begin_write().map_err(KdsError::from)?;
        {
            let mut table = txn.open_table(STATIONS)?;
            let value = serde_json::to_vec(&station)?;
            table.insert((station.venue_id.as_str(), station.key.as_str()), value.as_slice())?;
        }
        txn.commit().map_err(StorageError::from)?;
        tracing::info!(venue_id = %station.venue_id, station_key = %station.key, "Station saved");
        Ok(station)
    }

    /// Configured station, or the implicit one-area station named after a prep area
    pub fn station(&self, venue_id: &str, key: &str) -> KdsResult<Station> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(STATIONS)?;
        if let Some(value) = table.get((venue_id, key))? {
            return Ok(serde_json::from_slice(value.value())?);
        }
        match PrepArea::parse(key) {
            Some(area) => Ok(Station {
                key: area.as_str().to_string(),
                venue_id: venue_id.to_string(),
                name: area.as_str().to_string(),
                prep_areas: vec![area],
                undo_window_seconds: self.default_undo_window,
            }),
            None => Err(KdsError::StationNotFound(key.to_string())),
        }
    }

    /// Configured stations plus an implicit station per unconfigured prep area
    pub fn list_stations(&self, venue_id: &str) -> KdsResult<Vec<Station>> {
        let read_txn = self.storage.begin_read()?;
        let table = read_txn.open_table(STATIONS)?;
        let mut stations: Vec<Station> = Vec::new();
        for row in table.range((venue_id, "")..)? {
            let (key, value) = row?;
            if key.value().0 != venue_id {
                break;
            }
            stations.push(serde_json::from_slice(value.value())?);
        }
        for area in PrepArea::ALL {
            if !stations.iter().any(|s| s.key == area.as_str()) {
                stations.push(Station {
                    key: area.as_str().to_string(),
                    venue_id: venue_id.to_string(),
                    name: area.as_str().to_string(),
                    prep_areas: vec![area],
                    undo_window_seconds: self.default_undo_window,
                });
            }
        }
        Ok(stations)
    }

    // ========== Queries ==========

    pub fn get_ticket(&self, ticket_id: &str) -> KdsResult<Ticket> {
        self.storage
            .get(TICKETS, ticket_id)?
            .ok_or_else(|| KdsError::TicketNotFound(ticket_id.to_string()))
    }

    pub fn tickets_for_order(&self, order_id: &str) -> KdsResult<Vec<Ticket>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(TICKETS_BY_ORDER)?;
        let docs = read_txn.open_table(TICKETS)?;
        let mut tickets: Vec<Ticket> = crate::db::load_indexed(&index, &docs, order_id)?;
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tickets)
    }

    /// Tickets of a venue in one status, oldest first
    fn tickets_in_status(&self, venue_id: &str, status: TicketStatus) -> KdsResult<Vec<Ticket>> {
        let read_txn = self.storage.begin_read()?;
        let index = read_txn.open_table(TICKETS_BY_VENUE)?;
        let docs = read_txn.open_table(TICKETS)?;
        let s = status_key(status);
        let mut out = Vec::new();
        for row in index.range((venue_id, s, i64::MIN, "")..=(venue_id, s, i64::MAX, "\u{10FFFF}"))? {
            let (key, _) = row?;
            let (_, _, _, id) = key.value();
            if let Some(ticket) = get_doc(&docs, id)? {
                out.push(ticket);
            }
        }
        Ok(out)
    }

    /// NEW, PREPARING and READY tickets routed to a station, oldest first
    pub fn active_tickets(&self, station: &Station) -> KdsResult<Vec<Ticket>> {
        let mut tickets = Vec::new();
        for status in [TicketStatus::New, TicketStatus::Preparing, TicketStatus::Ready] {
            tickets.extend(
                self.tickets_in_status(&station.venue_id, status)?
                    .into_iter()
                    .filter(|t: &Ticket| station.prep_areas.contains(&t.prep_area)),
            );
        }
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tickets)
    }

    pub fn bootstrap(&self, venue_id: &str, station_key: &str) -> KdsResult<StationBootstrap> {
        let station = self.station(venue_id, station_key)?;
        let tickets = self.active_tickets(&station)?;
        Ok(StationBootstrap { station, tickets })
    }

    pub fn stats(&self, venue_id: &str, station_key: &str) -> KdsResult<StationStats> {
        let station = self.station(venue_id, station_key)?;
        let active = self.active_tickets(&station)?.len() as u64;
        let completed: Vec<Ticket> = self
            .tickets_in_status(venue_id, TicketStatus::Completed)?
            .into_iter()
            .filter(|t| station.prep_areas.contains(&t.prep_area))
            .collect();

        let prep_times: Vec<f64> = completed.iter().filter_map(prep_seconds).collect();
        let avg_prep_seconds = if prep_times.is_empty() {
            None
        } else {
            Some(prep_times.iter().sum::<f64>() / prep_times.len() as f64)
        };

        Ok(StationStats {
            station_key: station.key,
            completed: completed.len() as u64,
            active,
            avg_prep_seconds,
        })
    }

    // ========== Transitions ==========

    /// Move a ticket one step forward to `input.target`
    pub fn bump(
        &self,
        ticket_id: &str,
        input: &BumpTicket,
        actor: &str,
        at: DateTime<Utc>,
    ) -> KdsResult<Ticket> {
        self.transition(ticket_id, input.op_id.as_deref(), at, |ticket| {
            match ticket.status.next() {
                Some(next) if next == input.target => Ok(StateTransition {
                    from: Some(ticket.status),
                    to: next,
                    actor: actor.to_string(),
                    at,
                    undo: false,
                }),
                _ => Err(KdsError::Transition {
                    from: ticket.status,
                    to: input.target,
                }),
            }
        })
    }

    /// Step a ticket back once, within the station's undo window
    pub fn undo(
        &self,
        ticket_id: &str,
        input: &UndoTicket,
        actor: &str,
        at: DateTime<Utc>,
    ) -> KdsResult<Ticket> {
        let ticket = self.get_ticket(ticket_id)?;
        let window = self.station(&ticket.venue_id, &ticket.station_key)?.undo_window_seconds;

        self.transition(ticket_id, input.op_id.as_deref(), at, |ticket| {
            let last_at = ticket
                .state_history
                .last()
                .map(|t| t.at)
                .unwrap_or(ticket.created_at);
            if at > last_at + Duration::seconds(i64::from(window)) {
                return Err(KdsError::UndoExpired {
                    ticket_id: ticket.id.clone(),
                    window_seconds: window,
                });
            }
            match previous(ticket.status) {
                Some(prev) => Ok(StateTransition {
                    from: Some(ticket.status),
                    to: prev,
                    actor: actor.to_string(),
                    at,
                    undo: true,
                }),
                None => Err(KdsError::NothingToUndo(ticket.id.clone())),
            }
        })
    }

    fn transition(
        &self,
        ticket_id: &str,
        op_id: Option<&str>,
        at: DateTime<Utc>,
        decide: impl FnOnce(&Ticket) -> KdsResult<StateTransition>,
    ) -> KdsResult<Ticket> {
        let txn = self.storage.begin_write()?;
        let ticket = {
            let mut ticket: Ticket = {
                let table = txn.open_table(TICKETS)?;
                get_doc(&table, ticket_id)?
                    .ok_or_else(|| KdsError::TicketNotFound(ticket_id.to_string()))?
            };

            if let Some(op_id) = op_id {
                let ops = txn.open_table(TICKET_OPS)?;
                if ops.get((ticket_id, op_id))?.is_some() {
                    tracing::debug!(ticket_id, op_id, "Replayed ticket operation");
                    return Ok(ticket);
                }
            }

            let step = decide(&ticket)?;
            let old_status = ticket.status;
            ticket.status = step.to;
            ticket.updated_at = at;
            ticket.state_history.push(step);
            save_ticket(&txn, &ticket, Some(old_status))?;

            if let Some(op_id) = op_id {
                let mut ops = txn.open_table(TICKET_OPS)?;
                ops.insert((ticket_id, op_id), ())?;
            }
            ticket
        };
        txn.commit().map_err(StorageError::from)?;

        tracing::info!(
            ticket_id = %ticket.id,
            order_id = %ticket.order_id,
            status = %ticket.status,
            "Ticket transitioned"
        );
        Ok(ticket)
    }
}

/// First PREPARING to final READY
fn prep_seconds(ticket: &Ticket) -> Option<f64> {
    let started = ticket
        .state_history
        .iter()
        .find(|t| t.to == TicketStatus::Preparing)?
        .at;
    let ready = ticket
        .state_history
        .iter()
        .rev()
        .find(|t| t.to == TicketStatus::Ready)?
        .at;
    let millis = (ready - started).num_milliseconds();
    (millis >= 0).then(|| millis as f64 / 1000.0)
}

#[cfg(test)]
mod tests;
