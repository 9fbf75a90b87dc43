pub mod intake;
pub mod pagination;

use axum::{
    extract::{rejection::FormRejection, Form, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::session::AdminContext;
use crate::core::shared::error::{AjaxError, PqrsError};
use crate::core::shared::models::TicketStatus;
use crate::core::shared::schema::{cities, complaint_types, insurers, tickets};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::email::attachments;

use pagination::{Page, Pagination};

/// Ticket as shown in the admin console, with lookup names resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable)]
pub struct TicketRow {
    pub id: i32,
    pub patient_name: String,
    pub document_id: String,
    pub email: Option<String>,
    pub phone: String,
    pub description: String,
    pub attachment_path: Option<String>,
    pub status: String,
    pub response: Option<String>,
    pub response_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub notified: bool,
    pub city_id: i32,
    pub insurer_id: i32,
    pub city_name: String,
    pub insurer_name: String,
    pub complaint_type_name: String,
}

macro_rules! ticket_row_columns {
    () => {
        (
            tickets::id,
            tickets::patient_name,
            tickets::document_id,
            tickets::email,
            tickets::phone,
            tickets::description,
            tickets::attachment_path,
            tickets::status,
            tickets::response,
            tickets::response_date,
            tickets::created_at,
            tickets::notified,
            tickets::city_id,
            tickets::insurer_id,
            cities::name,
            insurers::name,
            complaint_types::name,
        )
    };
}

/// Joined ticket query with every filter of `TicketFilter` applied. A macro
/// so the same filters feed both the count and the page query.
macro_rules! filtered_tickets {
    ($filter:expr) => {{
        let filter: &TicketFilter = $filter;
        let mut query = tickets::table
            .inner_join(cities::table)
            .inner_join(insurers::table)
            .inner_join(complaint_types::table)
            .into_boxed();

        if let Some(city_id) = filter.city_scope {
            query = query.filter(tickets::city_id.eq(city_id));
        }
        if let Some(id) = filter.ticket_id {
            query = query.filter(tickets::id.eq(id));
        }
        if let Some(from) = filter.created_from {
            query = query.filter(tickets::created_at.ge(from));
        }
        if let Some(before) = filter.created_before {
            query = query.filter(tickets::created_at.lt(before));
        }
        if let Some(pattern) = filter.search_pattern() {
            let text_match = tickets::patient_name
                .ilike(pattern.clone())
                .or(tickets::document_id.ilike(pattern.clone()))
                .or(tickets::description.ilike(pattern.clone()))
                .or(cities::name.ilike(pattern.clone()))
                .or(insurers::name.ilike(pattern.clone()))
                .or(complaint_types::name.ilike(pattern.clone()))
                .or(tickets::response.ilike(pattern));
            query = match filter.search_id() {
                Some(id) => query.filter(text_match.or(tickets::id.eq(id))),
                None => query.filter(text_match),
            };
        }
        query
    }};
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub city_scope: Option<i32>,
    pub ticket_id: Option<i32>,
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl TicketFilter {
    pub fn for_context(ctx: &AdminContext) -> Self {
        Self {
            city_scope: ctx.city_scope(),
            ..Self::default()
        }
    }

    fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Case-insensitive substring pattern with LIKE wildcards escaped.
    pub fn search_pattern(&self) -> Option<String> {
        self.search_term().map(|term| {
            let escaped = term
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            format!("%{escaped}%")
        })
    }

    pub fn search_id(&self) -> Option<i32> {
        self.search_term()
            .and_then(|term| term.parse::<i32>().ok())
            .filter(|id| *id > 0)
    }
}

pub fn count_tickets(conn: &mut PgConnection, filter: &TicketFilter) -> Result<i64, PqrsError> {
    let total = filtered_tickets!(filter).count().get_result::<i64>(conn)?;
    Ok(total)
}

pub fn load_tickets(
    conn: &mut PgConnection,
    filter: &TicketFilter,
    pagination: Option<Pagination>,
) -> Result<Vec<TicketRow>, PqrsError> {
    let mut query = filtered_tickets!(filter)
        .select(ticket_row_columns!())
        .order((tickets::created_at.desc(), tickets::id.desc()));
    if let Some(p) = pagination {
        query = query.limit(p.limit()).offset(p.offset());
    }
    Ok(query.load::<TicketRow>(conn)?)
}

fn find_ticket(
    conn: &mut PgConnection,
    ctx: &AdminContext,
    id: i32,
) -> Result<TicketRow, PqrsError> {
    let filter = TicketFilter {
        ticket_id: Some(id),
        ..TicketFilter::default()
    };
    let ticket = load_tickets(conn, &filter, None)?
        .into_iter()
        .next()
        .ok_or_else(|| PqrsError::not_found(format!("Ticket {id} not found")))?;
    if !ctx.can_see_city(ticket.city_id) {
        return Err(PqrsError::Forbidden(
            "This ticket belongs to another city".to_string(),
        ));
    }
    Ok(ticket)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub status: Option<String>,
    pub response: Option<String>,
}

#[derive(Debug, Default, PartialEq, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct TicketChanges {
    pub status: Option<String>,
    pub response: Option<Option<String>>,
    pub response_date: Option<Option<DateTime<Utc>>>,
}

impl TicketChanges {
    /// A non-empty response stamps the response date; an empty one clears both.
    pub fn from_request(req: UpdateTicketRequest, now: DateTime<Utc>) -> Result<Self, PqrsError> {
        let status = req
            .status
            .map(|s| s.parse::<TicketStatus>().map_err(PqrsError::Validation))
            .transpose()?
            .map(|s| s.as_str().to_string());

        let (response, response_date) = match req.response {
            Some(text) if !text.trim().is_empty() => (Some(Some(text)), Some(Some(now))),
            Some(_) => (Some(None), Some(None)),
            None => (None, None),
        };

        let changes = Self {
            status,
            response,
            response_date,
        };
        if changes == Self::default() {
            return Err(PqrsError::validation("Nothing to update"));
        }
        Ok(changes)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NotifiedForm {
    pub ticket_id: Option<String>,
    pub notified: Option<String>,
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<TicketRow>>, PqrsError> {
    let pagination = Pagination::new(query.page, query.per_page);
    let filter = TicketFilter {
        search: query.search,
        ..TicketFilter::for_context(&ctx)
    };

    let conn = state.conn.clone();
    let page = tokio::task::spawn_blocking(move || -> Result<Page<TicketRow>, PqrsError> {
        let mut db_conn = conn.get()?;
        let total = count_tickets(&mut db_conn, &filter)?;
        let items = load_tickets(&mut db_conn, &filter, Some(pagination))?;
        Ok(Page::new(items, pagination, total))
    })
    .await??;

    Ok(Json(page))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Path(id): Path<i32>,
) -> Result<Json<TicketRow>, PqrsError> {
    let conn = state.conn.clone();
    let ticket = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        find_ticket(&mut db_conn, &ctx, id)
    })
    .await??;

    Ok(Json(ticket))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Path(id): Path<i32>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<TicketRow>, PqrsError> {
    ctx.require_admin()?;
    let changes = TicketChanges::from_request(req, Utc::now())?;

    let conn = state.conn.clone();
    let ticket = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        let updated = diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set(&changes)
            .execute(&mut db_conn)?;
        if updated == 0 {
            return Err(PqrsError::not_found(format!("Ticket {id} not found")));
        }
        info!("Ticket {id} updated by {}", ctx.username);
        find_ticket(&mut db_conn, &ctx, id)
    })
    .await??;

    Ok(Json(ticket))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Path(id): Path<i32>,
) -> Result<Json<serde_json::Value>, PqrsError> {
    ctx.require_admin()?;

    let conn = state.conn.clone();
    let uploads = state.config.uploads.clone();
    let removed_file = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        let mut staged = None;
        let outcome = db_conn.transaction::<_, PqrsError, _>(|tx| {
            let attachment = tickets::table
                .filter(tickets::id.eq(id))
                .select(tickets::attachment_path)
                .for_update()
                .first::<Option<String>>(tx)
                .optional()?
                .ok_or_else(|| PqrsError::not_found(format!("Ticket {id} not found")))?;

            diesel::delete(tickets::table.filter(tickets::id.eq(id))).execute(tx)?;

            if let Some(path) = attachment.as_deref().filter(|p| !p.trim().is_empty()) {
                staged = attachments::stage_removal(&uploads, path)?;
            }
            Ok(())
        });
        attachments::settle_removal(staged, outcome).map(|((), removed)| removed)
    })
    .await??;

    info!(
        "Ticket {id} deleted by {} (attachment removed: {removed_file})",
        ctx.username
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "message": format!("Ticket {id} deleted"),
    })))
}

pub fn parse_export_date(value: Option<&str>, field: &str) -> Result<NaiveDate, PqrsError> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PqrsError::validation(format!("The '{field}' date is required")))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| PqrsError::validation(format!("Invalid '{field}' date: {raw}")))
}

/// UTC instant of local midnight at the start of `date`.
pub fn local_midnight_utc(date: NaiveDate, offset: FixedOffset) -> Result<DateTime<Utc>, PqrsError> {
    date.and_time(NaiveTime::MIN)
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| PqrsError::validation(format!("Invalid date: {date}")))
}

pub fn export_range(
    from: NaiveDate,
    to: NaiveDate,
    offset: FixedOffset,
) -> Result<(DateTime<Utc>, DateTime<Utc>), PqrsError> {
    if from > to {
        return Err(PqrsError::validation(
            "The start date must not be after the end date",
        ));
    }
    let end = to
        .succ_opt()
        .ok_or_else(|| PqrsError::validation(format!("Invalid date: {to}")))?;
    Ok((local_midnight_utc(from, offset)?, local_midnight_utc(end, offset)?))
}

pub fn write_csv(rows: &[TicketRow], offset: FixedOffset) -> Result<Vec<u8>, PqrsError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let to_internal = |e: csv::Error| PqrsError::Internal(format!("CSV error: {e}"));

    writer
        .write_record([
            "ID",
            "Fecha",
            "Paciente",
            "Documento",
            "Correo",
            "Teléfono",
            "Ciudad",
            "EPS",
            "Tipo",
            "Estado",
            "Descripción",
            "Respuesta",
            "Fecha respuesta",
            "Notificado",
        ])
        .map_err(to_internal)?;

    for row in rows {
        let status = row
            .status
            .parse::<TicketStatus>()
            .map(|s| s.label().to_string())
            .unwrap_or_else(|_| row.status.clone());
        let format_ts = |ts: DateTime<Utc>| {
            ts.with_timezone(&offset)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        };
        writer
            .write_record([
                row.id.to_string(),
                format_ts(row.created_at),
                row.patient_name.clone(),
                row.document_id.clone(),
                row.email.clone().unwrap_or_default(),
                row.phone.clone(),
                row.city_name.clone(),
                row.insurer_name.clone(),
                row.complaint_type_name.clone(),
                status,
                row.description.clone(),
                row.response.clone().unwrap_or_default(),
                row.response_date.map(format_ts).unwrap_or_default(),
                if row.notified { "Sí" } else { "No" }.to_string(),
            ])
            .map_err(to_internal)?;
    }

    let mut bytes = "\u{FEFF}".as_bytes().to_vec();
    bytes.extend(
        writer
            .into_inner()
            .map_err(|e| PqrsError::Internal(format!("CSV error: {e}")))?,
    );
    Ok(bytes)
}

pub async fn export_tickets(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    Query(query): Query<ExportQuery>,
) -> Result<Response, PqrsError> {
    let from = parse_export_date(query.from.as_deref(), "from")?;
    let to = parse_export_date(query.to.as_deref(), "to")?;
    let offset = state.config.email.local_offset();
    let (created_from, created_before) = export_range(from, to, offset)?;

    let filter = TicketFilter {
        created_from: Some(created_from),
        created_before: Some(created_before),
        ..TicketFilter::for_context(&ctx)
    };

    let conn = state.conn.clone();
    let rows = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        load_tickets(&mut db_conn, &filter, None)
    })
    .await??;

    info!("{} exported {} tickets ({from} to {to})", ctx.username, rows.len());

    let body = write_csv(&rows, offset)?;
    let disposition = format!("attachment; filename=\"pqrs_{from}_{to}.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

pub fn parse_notified_flag(value: Option<&str>) -> Result<bool, PqrsError> {
    match value.map(str::trim) {
        Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        _ => Err(PqrsError::validation("Invalid notified value")),
    }
}

pub async fn set_notified(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    form: Result<Form<NotifiedForm>, FormRejection>,
) -> Result<Json<serde_json::Value>, AjaxError> {
    if !ctx.is_admin() {
        warn!("{} tried to change a notified flag", ctx.username);
        return Err(PqrsError::Unauthorized("Not authorized".to_string()).into());
    }

    let Form(form) = form?;
    let ticket_id: i32 = form
        .ticket_id
        .as_deref()
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| PqrsError::validation("Invalid ticket id"))?;
    let notified = parse_notified_flag(form.notified.as_deref())?;

    let conn = state.conn.clone();
    tokio::task::spawn_blocking(move || -> Result<(), PqrsError> {
        let mut db_conn = conn.get()?;
        let updated = diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set(tickets::notified.eq(notified))
            .execute(&mut db_conn)?;
        if updated == 0 {
            return Err(PqrsError::not_found(format!("Ticket {ticket_id} not found")));
        }
        Ok(())
    })
    .await
    .map_err(PqrsError::from)??;

    info!("{} set notified={notified} on ticket {ticket_id}", ctx.username);

    Ok(Json(serde_json::json!({ "success": true })))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::ADMIN_PQRS, get(list_tickets))
        .route(ApiUrls::ADMIN_PQRS_EXPORT, get(export_tickets))
        .route(ApiUrls::ADMIN_PQRS_NOTIFIED, post(set_notified))
        .route(
            ApiUrls::ADMIN_PQRS_BY_ID,
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
}
