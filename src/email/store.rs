use diesel::prelude::*;

use crate::core::shared::error::PqrsError;
use crate::core::shared::models::TicketDetails;
use crate::core::shared::schema::{cities, complaint_types, insurer_emails, insurers, tickets};
use crate::core::shared::utils::DbPool;

/// What the dispatcher needs from persistence.
pub trait NotificationStore: Send + Sync {
    fn load_ticket_details(&self, ticket_id: i32) -> Result<Option<TicketDetails>, PqrsError>;
    fn active_insurer_emails(&self, insurer_id: i32) -> Result<Vec<String>, PqrsError>;
    fn mark_notified(&self, ticket_id: i32) -> Result<(), PqrsError>;
}

pub struct PgNotificationStore {
    pool: DbPool,
}

impl PgNotificationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Ticket columns joined with lookup names, in `TicketDetails` field order.
pub fn load_details(
    conn: &mut PgConnection,
    ticket_id: i32,
) -> Result<Option<TicketDetails>, PqrsError> {
    let details = tickets::table
        .inner_join(cities::table)
        .inner_join(insurers::table)
        .inner_join(complaint_types::table)
        .filter(tickets::id.eq(ticket_id))
        .select((
            tickets::id,
            tickets::patient_name,
            tickets::document_id,
            tickets::email,
            tickets::phone,
            tickets::description,
            tickets::attachment_path,
            tickets::status,
            tickets::response,
            tickets::created_at,
            tickets::notified,
            tickets::insurer_id,
            cities::name,
            insurers::name,
            complaint_types::name,
        ))
        .first::<TicketDetails>(conn)
        .optional()?;
    Ok(details)
}

impl NotificationStore for PgNotificationStore {
    fn load_ticket_details(&self, ticket_id: i32) -> Result<Option<TicketDetails>, PqrsError> {
        let mut conn = self.pool.get()?;
        load_details(&mut conn, ticket_id)
    }

    fn active_insurer_emails(&self, insurer_id: i32) -> Result<Vec<String>, PqrsError> {
        let mut conn = self.pool.get()?;
        let emails = insurer_emails::table
            .filter(insurer_emails::insurer_id.eq(insurer_id))
            .filter(insurer_emails::active.eq(true))
            .order(insurer_emails::id.asc())
            .select(insurer_emails::email)
            .load::<String>(&mut conn)?;
        Ok(emails)
    }

    fn mark_notified(&self, ticket_id: i32) -> Result<(), PqrsError> {
        let mut conn = self.pool.get()?;
        let updated = diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set(tickets::notified.eq(true))
            .execute(&mut conn)?;
        if updated == 0 {
            return Err(PqrsError::not_found(format!("Ticket {ticket_id} not found")));
        }
        Ok(())
    }
}
