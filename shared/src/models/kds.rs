//! Kitchen display tickets and stations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use super::recipe::PrepArea;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    New,
    Preparing,
    Ready,
    Completed,
    /// Order voided before the ticket finished
    Withdrawn,
}

impl TicketStatus {
    /// Status a single forward bump leads to
    pub fn next(&self) -> Option<TicketStatus> {
        match self {
            TicketStatus::New => Some(TicketStatus::Preparing),
            TicketStatus::Preparing => Some(TicketStatus::Ready),
            TicketStatus::Ready => Some(TicketStatus::Completed),
            TicketStatus::Completed | TicketStatus::Withdrawn => None,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, TicketStatus::Completed | TicketStatus::Withdrawn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "NEW",
            TicketStatus::Preparing => "PREPARING",
            TicketStatus::Ready => "READY",
            TicketStatus::Completed => "COMPLETED",
            TicketStatus::Withdrawn => "WITHDRAWN",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order item as shown on a ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketItem {
    pub order_item_id: String,
    pub menu_item_id: String,
    pub name: String,
    pub qty: u32,
    pub seat_no: Option<u32>,
    pub course_no: Option<u32>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// `None` for the creation entry
    pub from: Option<TicketStatus>,
    pub to: TicketStatus,
    pub actor: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub undo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub order_id: String,
    pub order_display_id: String,
    pub venue_id: String,
    pub prep_area: PrepArea,
    pub station_key: String,
    pub status: TicketStatus,
    pub items: Vec<TicketItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state_history: Vec<StateTransition>,
}

impl Ticket {
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        if self.status != TicketStatus::Completed {
            return None;
        }
        self.state_history.last().map(|t| t.at)
    }
}

/// Station configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub key: String,
    pub venue_id: String,
    pub name: String,
    pub prep_areas: Vec<PrepArea>,
    pub undo_window_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StationUpsert {
    #[validate(length(min = 1, max = 64))]
    pub venue_id: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1))]
    pub prep_areas: Vec<PrepArea>,
    #[validate(range(min = 1, max = 3600))]
    pub undo_window_seconds: Option<u32>,
}

/// Initial render payload for a station client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationBootstrap {
    pub station: Station,
    pub tickets: Vec<Ticket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationStats {
    pub station_key: String,
    pub completed: u64,
    pub active: u64,
    /// First PREPARING to READY, averaged over completed tickets
    pub avg_prep_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BumpTicket {
    pub target: TicketStatus,
    #[validate(length(min = 1, max = 128))]
    pub op_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UndoTicket {
    #[validate(length(min = 1, max = 128))]
    pub op_id: Option<String>,
}
