pub mod store;

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use lettre::Address;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::session::AdminContext;
use crate::core::shared::error::PqrsError;
use crate::core::shared::models::{Insurer, InsurerEmail};
use crate::core::shared::schema::{insurer_emails, insurers};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;

pub use store::{DirectoryStore, DirectoryTx, PgDirectory};

#[derive(Debug, Clone, Deserialize)]
pub struct InsurerForm {
    pub name: String,
    pub active: Option<bool>,
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidInsurer {
    pub name: String,
    pub active: bool,
    pub emails: Vec<String>,
}

impl InsurerForm {
    /// Trims everything, drops blank and repeated emails (ignoring case) and
    /// requires at least one valid address.
    pub fn validate(self) -> Result<ValidInsurer, PqrsError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(PqrsError::validation("The insurer name is required"));
        }

        let mut seen = HashSet::new();
        let mut emails = Vec::new();
        for raw in self.emails {
            let email = raw.trim().to_string();
            if email.is_empty() || !seen.insert(email.to_lowercase()) {
                continue;
            }
            if email.parse::<Address>().is_err() {
                return Err(PqrsError::validation(format!("Invalid email address: {email}")));
            }
            emails.push(email);
        }
        if emails.is_empty() {
            return Err(PqrsError::validation(
                "At least one notification email is required",
            ));
        }

        Ok(ValidInsurer {
            name,
            active: self.active.unwrap_or(true),
            emails,
        })
    }
}

pub fn create_insurer<D: DirectoryStore>(
    store: &D,
    form: InsurerForm,
    now: DateTime<Utc>,
) -> Result<i32, PqrsError> {
    let insurer = form.validate()?;
    store.transaction(|tx| {
        if tx.insurer_name_taken(&insurer.name, None)? {
            return Err(PqrsError::validation(format!(
                "An insurer named '{}' already exists",
                insurer.name
            )));
        }
        let id = tx.insert_insurer(&insurer.name, insurer.active, now)?;
        for email in &insurer.emails {
            tx.insert_email(id, email, now)?;
        }
        Ok(id)
    })
}

/// Replaces the insurer's notification set. Previous addresses are
/// deactivated, never deleted.
pub fn update_insurer<D: DirectoryStore>(
    store: &D,
    id: i32,
    form: InsurerForm,
    now: DateTime<Utc>,
) -> Result<(), PqrsError> {
    let insurer = form.validate()?;
    store.transaction(|tx| {
        if tx.insurer_name_taken(&insurer.name, Some(id))? {
            return Err(PqrsError::validation(format!(
                "Another insurer is already named '{}'",
                insurer.name
            )));
        }
        if tx.update_insurer(id, &insurer.name, insurer.active)? == 0 {
            return Err(PqrsError::not_found(format!("Insurer {id} not found")));
        }
        tx.deactivate_emails(id)?;
        for email in &insurer.emails {
            tx.insert_email(id, email, now)?;
        }
        Ok(())
    })
}

/// Deletes an insurer and its emails unless tickets still reference it.
pub fn delete_insurer<D: DirectoryStore>(store: &D, id: i32) -> Result<usize, PqrsError> {
    store.transaction(|tx| {
        let tickets = tx.count_tickets(id)?;
        if tickets > 0 {
            return Err(PqrsError::validation(format!(
                "The insurer cannot be deleted because it has {tickets} associated PQRS"
            )));
        }
        let emails = tx.delete_emails(id)?;
        if tx.delete_insurer(id)? == 0 {
            return Err(PqrsError::not_found(format!("Insurer {id} not found")));
        }
        Ok(emails)
    })
}

#[derive(Debug, Serialize)]
pub struct InsurerSummary {
    #[serde(flatten)]
    pub insurer: Insurer,
    pub emails: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InsurerDetail {
    #[serde(flatten)]
    pub insurer: Insurer,
    pub emails: Vec<InsurerEmail>,
}

pub async fn list_insurers(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
) -> Result<Json<Vec<InsurerSummary>>, PqrsError> {
    ctx.require_admin()?;

    let conn = state.conn.clone();
    let list = tokio::task::spawn_blocking(move || -> Result<Vec<InsurerSummary>, PqrsError> {
        let mut db_conn = conn.get()?;
        let all = insurers::table
            .order(insurers::name.asc())
            .select(Insurer::as_select())
            .load(&mut db_conn)?;
        let active_emails: Vec<(i32, String)> = insurer_emails::table
            .filter(insurer_emails::active.eq(true))
            .order(insurer_emails::id.asc())
            .select((insurer_emails::insurer_id, insurer_emails::email))
            .load(&mut db_conn)?;

        let mut by_insurer: HashMap<i32, Vec<String>> = HashMap::new();
        for (insurer_id, email) in active_emails {
            by_insurer.entry(insurer_id).or_default().push(email);
        }

        Ok(all
            .into_iter()
            .map(|insurer| InsurerSummary {
                emails: by_insurer.remove(&insurer.id).unwrap_or_default(),
                insurer,
            })
            .collect())
    })
    .await??;

    Ok(Json(list))
}

pub async fn get_insurer(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Path(id): Path<i32>,
) -> Result<Json<InsurerDetail>, PqrsError> {
    ctx.require_admin()?;

    let conn = state.conn.clone();
    let detail = tokio::task::spawn_blocking(move || -> Result<InsurerDetail, PqrsError> {
        let mut db_conn = conn.get()?;
        let insurer = insurers::table
            .filter(insurers::id.eq(id))
            .select(Insurer::as_select())
            .first(&mut db_conn)
            .optional()?
            .ok_or_else(|| PqrsError::not_found(format!("Insurer {id} not found")))?;
        let emails = insurer_emails::table
            .filter(insurer_emails::insurer_id.eq(id))
            .order((insurer_emails::active.desc(), insurer_emails::created_at.desc()))
            .select(InsurerEmail::as_select())
            .load(&mut db_conn)?;
        Ok(InsurerDetail { insurer, emails })
    })
    .await??;

    Ok(Json(detail))
}

pub async fn create_insurer_handler(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Json(form): Json<InsurerForm>,
) -> Result<Json<serde_json::Value>, PqrsError> {
    ctx.require_admin()?;

    let directory = PgDirectory::new(state.conn.clone());
    let id = tokio::task::spawn_blocking(move || create_insurer(&directory, form, Utc::now()))
        .await??;

    info!("Insurer {id} created by {}", ctx.username);
    Ok(Json(serde_json::json!({ "success": true, "id": id })))
}

pub async fn update_insurer_handler(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Path(id): Path<i32>,
    Json(form): Json<InsurerForm>,
) -> Result<Json<serde_json::Value>, PqrsError> {
    ctx.require_admin()?;

    let directory = PgDirectory::new(state.conn.clone());
    tokio::task::spawn_blocking(move || update_insurer(&directory, id, form, Utc::now()))
        .await??;

    info!("Insurer {id} updated by {}", ctx.username);
    Ok(Json(serde_json::json!({ "success": true, "id": id })))
}

pub async fn delete_insurer_handler(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, PqrsError> {
    ctx.require_admin()?;

    let directory = PgDirectory::new(state.conn.clone());
    let emails = tokio::task::spawn_blocking(move || delete_insurer(&directory, id)).await??;

    info!(
        "Insurer {id} deleted by {} ({emails} email(s) removed)",
        ctx.username
    );
    Ok(Json(serde_json::json!({ "success": true })))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            ApiUrls::ADMIN_INSURERS,
            get(list_insurers).post(create_insurer_handler),
        )
        .route(
            ApiUrls::ADMIN_INSURER_BY_ID,
            get(get_insurer)
                .put(update_insurer_handler)
                .delete(delete_insurer_handler),
        )
}
