use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::shared::schema::{
    admin_users, cities, complaint_types, insurer_emails, insurers, tickets,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Label shown to patients and insurers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pendiente",
            Self::InProgress => "En Proceso",
            Self::Resolved => "Resuelto",
            Self::Closed => "Cerrado",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" | "pendiente" => Ok(Self::Pending),
            "in_progress" | "inprogress" | "en proceso" => Ok(Self::InProgress),
            "resolved" | "resuelto" => Ok(Self::Resolved),
            "closed" | "cerrado" => Ok(Self::Closed),
            other => Err(format!("Unknown ticket status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = cities)]
pub struct City {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = complaint_types)]
pub struct ComplaintType {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = insurers)]
pub struct Insurer {
    pub id: i32,
    pub name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = insurer_emails)]
pub struct InsurerEmail {
    pub id: i32,
    pub insurer_id: i32,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub patient_name: String,
    pub document_id: String,
    pub email: Option<String>,
    pub phone: String,
    pub city_id: i32,
    pub insurer_id: i32,
    pub complaint_type_id: i32,
    pub description: String,
    pub attachment_path: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub notified: bool,
}

/// Ticket joined with the names of its city, insurer and complaint type.
/// This is everything the notification emails need.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
pub struct TicketDetails {
    pub id: i32,
    pub patient_name: String,
    pub document_id: String,
    pub email: Option<String>,
    pub phone: String,
    pub description: String,
    pub attachment_path: Option<String>,
    pub status: String,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub notified: bool,
    pub insurer_id: i32,
    pub city_name: String,
    pub insurer_name: String,
    pub complaint_type_name: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = admin_users)]
pub struct AdminUser {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub city_id: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = admin_users)]
pub struct NewAdminUser {
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub city_id: Option<i32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_string() {
        for status in [
            TicketStatus::Pending,
            TicketStatus::InProgress,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>(), Ok(status));
        }
    }

    #[test]
    fn test_status_accepts_legacy_labels() {
        assert_eq!("En Proceso".parse::<TicketStatus>(), Ok(TicketStatus::InProgress));
        assert_eq!("Pendiente".parse::<TicketStatus>(), Ok(TicketStatus::Pending));
        assert!("archived".parse::<TicketStatus>().is_err());
    }
}
