//! Ticket creation and withdrawal inside an order's transaction

use chrono::{DateTime, Utc};
use redb::WriteTransaction;
use shared::models::{Order, OrderItem, PrepArea, StateTransition, Ticket, TicketItem, TicketStatus};
use std::collections::BTreeMap;

use super::{KdsResult, save_ticket};
use crate::db::tables::{TICKETS, TICKETS_BY_ORDER};
use crate::db::{get_doc, index_ids};

/// One NEW ticket per prep area for a send batch
pub fn create_tickets(
    txn: &WriteTransaction,
    order: &Order,
    batch: &[&OrderItem],
    at: DateTime<Utc>,
) -> KdsResult<Vec<Ticket>> {
    let mut groups: BTreeMap<PrepArea, Vec<TicketItem>> = BTreeMap::new();
    for item in batch {
        groups.entry(item.prep_area).or_default().push(TicketItem {
            order_item_id: item.id.clone(),
            menu_item_id: item.menu_item_id.clone(),
            name: item.name.clone(),
            qty: item.qty,
            seat_no: item.seat_no,
            course_no: item.course_no,
            instructions: item.instructions.clone(),
        });
    }

    let mut tickets = Vec::with_capacity(groups.len());
    for (prep_area, items) in groups {
        let ticket = Ticket {
            id: shared::util::new_id(),
            order_id: order.id.clone(),
            order_display_id: order.display_id.clone(),
            venue_id: order.venue_id.clone(),
            prep_area,
            station_key: prep_area.as_str().to_string(),
            status: TicketStatus::New,
            items,
            created_at: at,
            updated_at: at,
            state_history: vec![StateTransition {
                from: None,
                to: TicketStatus::New,
                actor: order.server_id.clone(),
                at,
                undo: false,
            }],
        };
        save_ticket(txn, &ticket, None)?;
        let mut by_order = txn.open_table(TICKETS_BY_ORDER)?;
        by_order.insert((order.id.as_str(), ticket.id.as_str()), ())?;

        tracing::info!(
            ticket_id = %ticket.id,
            order_id = %order.id,
            prep_area = %prep_area,
            items = ticket.items.len(),
            "Ticket routed"
        );
        tickets.push(ticket);
    }
    Ok(tickets)
}

/// Withdraw every unfinished ticket of an order
pub fn withdraw_for_order(
    txn: &WriteTransaction,
    order_id: &str,
    actor: &str,
    at: DateTime<Utc>,
) -> KdsResult<Vec<Ticket>> {
    let ids = {
        let by_order = txn.open_table(TICKETS_BY_ORDER)?;
        index_ids(&by_order, order_id)?
    };

    let mut withdrawn = Vec::new();
    for id in ids {
        let ticket: Option<Ticket> = {
            let table = txn.open_table(TICKETS)?;
            get_doc(&table, &id)?
        };
        let Some(mut ticket) = ticket else { continue };
        if !ticket.status.is_active() {
            continue;
        }
        let old_status = ticket.status;
        ticket.state_history.push(StateTransition {
            from: Some(old_status),
            to: TicketStatus::Withdrawn,
            actor: actor.to_string(),
            at,
            undo: false,
        });
        ticket.status = TicketStatus::Withdrawn;
        ticket.updated_at = at;
        save_ticket(txn, &ticket, Some(old_status))?;
        withdrawn.push(ticket);
    }
    Ok(withdrawn)
}
