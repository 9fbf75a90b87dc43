use axum::{
    extract::{Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use lettre::Address;
use log::{error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::config::UploadsConfig;
use crate::core::shared::error::PqrsError;
use crate::core::shared::models::{City, ComplaintType, NewTicket, TicketStatus};
use crate::core::shared::schema::{cities, complaint_types, insurers, tickets};
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use crate::email::store::load_details;

pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png", "doc", "docx"];

const MAX_PATIENT_NAME_LEN: usize = 200;
const MAX_DOCUMENT_ID_LEN: usize = 40;
const MAX_PHONE_LEN: usize = 40;
const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Default)]
pub struct IntakeSubmission {
    pub patient_name: Option<String>,
    pub document_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city_id: Option<String>,
    pub insurer_id: Option<String>,
    pub complaint_type_id: Option<String>,
    pub description: Option<String>,
    pub attachment: Option<UploadedFile>,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIntake {
    pub patient_name: String,
    pub document_id: String,
    pub email: String,
    pub phone: String,
    pub city_id: i32,
    pub insurer_id: i32,
    pub complaint_type_id: i32,
    pub description: String,
    /// Lowercased extension and contents.
    pub attachment: Option<(String, Vec<u8>)>,
}

fn required(value: Option<String>, label: &str) -> Result<String, PqrsError> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        return Err(PqrsError::validation(format!("The field '{label}' is required")));
    }
    Ok(value)
}

/// Required field that must also fit its column.
fn bounded(value: Option<String>, label: &str, max_len: usize) -> Result<String, PqrsError> {
    let value = required(value, label)?;
    if value.chars().count() > max_len {
        return Err(PqrsError::validation(format!(
            "The field '{label}' must not exceed {max_len} characters"
        )));
    }
    Ok(value)
}

fn positive_id(value: Option<String>, label: &str) -> Result<i32, PqrsError> {
    required(value, label)?
        .parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| PqrsError::validation(format!("Select a valid {label}")))
}

pub fn attachment_extension(file_name: &str) -> Result<String, PqrsError> {
    let ext = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(PqrsError::validation(format!(
            "File type not allowed. Allowed types: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

impl IntakeSubmission {
    pub fn validate(self, max_attachment_bytes: u64) -> Result<ValidatedIntake, PqrsError> {
        let patient_name = bounded(self.patient_name, "patient_name", MAX_PATIENT_NAME_LEN)?;
        let document_id = bounded(self.document_id, "document_id", MAX_DOCUMENT_ID_LEN)?;
        let email = bounded(self.email, "email", MAX_EMAIL_LEN)?;
        if email.parse::<Address>().is_err() {
            return Err(PqrsError::validation(format!("Invalid email address: {email}")));
        }
        let phone = bounded(self.phone, "phone", MAX_PHONE_LEN)?;
        let city_id = positive_id(self.city_id, "city")?;
        let insurer_id = positive_id(self.insurer_id, "insurer")?;
        let complaint_type_id = positive_id(self.complaint_type_id, "complaint type")?;
        let description = required(self.description, "description")?;

        let attachment = match self.attachment {
            Some(file) if !file.bytes.is_empty() => {
                let ext = attachment_extension(&file.file_name)?;
                if file.bytes.len() as u64 > max_attachment_bytes {
                    return Err(PqrsError::validation(format!(
                        "The file exceeds the maximum size of {} MB",
                        max_attachment_bytes / (1024 * 1024)
                    )));
                }
                Some((ext, file.bytes))
            }
            _ => None,
        };

        Ok(ValidatedIntake {
            patient_name,
            document_id,
            email,
            phone,
            city_id,
            insurer_id,
            complaint_type_id,
            description,
            attachment,
        })
    }
}

async fn read_submission(mut multipart: Multipart) -> Result<IntakeSubmission, PqrsError> {
    let mut submission = IntakeSubmission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PqrsError::validation(format!("Invalid form data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "attachment" {
            let file_name = field.file_name().map(|s| s.to_string()).unwrap_or_default();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| PqrsError::validation(format!("Invalid attachment: {e}")))?;
            if !file_name.is_empty() {
                submission.attachment = Some(UploadedFile {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| PqrsError::validation(format!("Invalid form data: {e}")))?;
        let slot = match name.as_str() {
            "patient_name" => &mut submission.patient_name,
            "document_id" => &mut submission.document_id,
            "email" => &mut submission.email,
            "phone" => &mut submission.phone,
            "city_id" => &mut submission.city_id,
            "insurer_id" => &mut submission.insurer_id,
            "complaint_type_id" => &mut submission.complaint_type_id,
            "description" => &mut submission.description,
            _ => continue,
        };
        *slot = Some(value);
    }

    Ok(submission)
}

fn check_references(conn: &mut PgConnection, intake: &ValidatedIntake) -> Result<(), PqrsError> {
    let city_exists: i64 = cities::table
        .filter(cities::id.eq(intake.city_id))
        .count()
        .get_result(conn)?;
    if city_exists == 0 {
        return Err(PqrsError::validation("The selected city does not exist"));
    }

    let type_exists: i64 = complaint_types::table
        .filter(complaint_types::id.eq(intake.complaint_type_id))
        .count()
        .get_result(conn)?;
    if type_exists == 0 {
        return Err(PqrsError::validation(
            "The selected complaint type does not exist",
        ));
    }

    let insurer_active: i64 = insurers::table
        .filter(insurers::id.eq(intake.insurer_id))
        .filter(insurers::active.eq(true))
        .count()
        .get_result(conn)?;
    if insurer_active == 0 {
        return Err(PqrsError::validation(
            "The selected insurer does not exist or is inactive",
        ));
    }
    Ok(())
}

fn store_upload(uploads: &UploadsConfig, ext: &str, bytes: &[u8]) -> Result<(String, PathBuf), PqrsError> {
    std::fs::create_dir_all(&uploads.root)?;
    let stored_name = format!("{}.{ext}", Uuid::new_v4());
    let path = uploads.root.join(&stored_name);
    std::fs::write(&path, bytes)?;
    Ok((stored_name, path))
}

pub fn create_ticket(
    conn: &mut PgConnection,
    uploads: &UploadsConfig,
    intake: ValidatedIntake,
    now: DateTime<Utc>,
) -> Result<i32, PqrsError> {
    check_references(conn, &intake)?;

    let stored = match &intake.attachment {
        Some((ext, bytes)) => Some(store_upload(uploads, ext, bytes)?),
        None => None,
    };

    let new_ticket = NewTicket {
        patient_name: intake.patient_name,
        document_id: intake.document_id,
        email: Some(intake.email),
        phone: intake.phone,
        city_id: intake.city_id,
        insurer_id: intake.insurer_id,
        complaint_type_id: intake.complaint_type_id,
        description: intake.description,
        attachment_path: stored.as_ref().map(|(name, _)| name.clone()),
        status: TicketStatus::Pending.as_str().to_string(),
        created_at: now,
        notified: false,
    };

    let inserted = diesel::insert_into(tickets::table)
        .values(&new_ticket)
        .returning(tickets::id)
        .get_result::<i32>(conn);

    match inserted {
        Ok(id) => Ok(id),
        Err(e) => {
            if let Some((_, path)) = stored {
                if let Err(io) = std::fs::remove_file(&path) {
                    warn!("Could not remove orphaned upload {}: {io}", path.display());
                }
            }
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub id: i32,
    pub confirmation_url: String,
}

pub async fn submit_ticket(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<SubmitResponse>, PqrsError> {
    let submission = read_submission(multipart).await?;
    let intake = submission.validate(state.config.email.max_attachment_bytes)?;

    let conn = state.conn.clone();
    let uploads = state.config.uploads.clone();
    let id = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        create_ticket(&mut db_conn, &uploads, intake, Utc::now())
    })
    .await?
    .map_err(|e| {
        error!("PQRS submission failed: {e}");
        e
    })?;

    info!("PQRS #{id} registered");

    Ok(Json(SubmitResponse {
        success: true,
        id,
        confirmation_url: ApiUrls::confirmation_for(id),
    }))
}

#[derive(Debug, Serialize)]
pub struct Confirmation {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub patient_name: String,
    pub email: Option<String>,
    pub city_name: String,
    pub insurer_name: String,
    pub complaint_type_name: String,
}

pub async fn get_confirmation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Confirmation>, PqrsError> {
    let conn = state.conn.clone();
    let details = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        load_details(&mut db_conn, id)
    })
    .await??
    .ok_or_else(|| PqrsError::not_found(format!("PQRS #{id} not found")))?;

    Ok(Json(Confirmation {
        id: details.id,
        created_at: details.created_at,
        patient_name: details.patient_name,
        email: details.email,
        city_name: details.city_name,
        insurer_name: details.insurer_name,
        complaint_type_name: details.complaint_type_name,
    }))
}

#[derive(Debug, Serialize, Queryable)]
pub struct InsurerOption {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct FormOptions {
    pub cities: Vec<City>,
    pub complaint_types: Vec<ComplaintType>,
    pub insurers: Vec<InsurerOption>,
}

pub async fn form_options(
    State(state): State<Arc<AppState>>,
) -> Result<Json<FormOptions>, PqrsError> {
    let conn = state.conn.clone();
    let options = tokio::task::spawn_blocking(move || -> Result<FormOptions, PqrsError> {
        let mut db_conn = conn.get()?;
        let cities = cities::table
            .order(cities::name.asc())
            .select(City::as_select())
            .load(&mut db_conn)?;
        let complaint_types = complaint_types::table
            .order(complaint_types::id.asc())
            .select(ComplaintType::as_select())
            .load(&mut db_conn)?;
        let insurers = insurers::table
            .filter(insurers::active.eq(true))
            .order(insurers::name.asc())
            .select((insurers::id, insurers::name))
            .load::<InsurerOption>(&mut db_conn)?;
        Ok(FormOptions {
            cities,
            complaint_types,
            insurers,
        })
    })
    .await??;

    Ok(Json(options))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::PQRS_SUBMIT, post(submit_ticket))
        .route(ApiUrls::PQRS_FORM_OPTIONS, get(form_options))
        .route(ApiUrls::PQRS_CONFIRMATION, get(get_confirmation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> IntakeSubmission {
        IntakeSubmission {
            patient_name: Some("  María López ".to_string()),
            document_id: Some("1085".to_string()),
            email: Some("maria@example.com".to_string()),
            phone: Some("3109876543".to_string()),
            city_id: Some("2".to_string()),
            insurer_id: Some("5".to_string()),
            complaint_type_id: Some("3".to_string()),
            description: Some("No me entregaron los medicamentos".to_string()),
            attachment: None,
        }
    }

    #[test]
    fn test_valid_submission() {
        let intake = submission().validate(1024).unwrap();
        assert_eq!(intake.patient_name, "María López");
        assert_eq!(intake.insurer_id, 5);
        assert!(intake.attachment.is_none());
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        let mut s = submission();
        s.description = Some("   ".to_string());
        assert!(s.validate(1024).unwrap_err().to_string().contains("description"));

        let mut s = submission();
        s.email = Some("maria-at-example".to_string());
        assert!(matches!(s.validate(1024), Err(PqrsError::Validation(_))));

        let mut s = submission();
        s.city_id = Some("0".to_string());
        assert!(s.validate(1024).is_err());

        let mut s = submission();
        s.insurer_id = Some("abc".to_string());
        assert!(s.validate(1024).is_err());
    }

    #[test]
    fn test_field_lengths_match_columns() {
        let mut s = submission();
        s.patient_name = Some("a".repeat(200));
        s.document_id = Some("1".repeat(40));
        s.phone = Some("3".repeat(40));
        assert!(s.validate(1024).is_ok());

        let cases: [(fn(&mut IntakeSubmission, String), usize, &str); 4] = [
            (|s, v| s.patient_name = Some(v), 201, "patient_name"),
            (|s, v| s.document_id = Some(v), 41, "document_id"),
            (|s, v| s.phone = Some(v), 41, "phone"),
            (|s, v| s.email = Some(format!("{v}@x.co")), 250, "email"),
        ];
        for (set, len, field) in cases {
            let mut s = submission();
            set(&mut s, "9".repeat(len));
            let err = s.validate(1024).unwrap_err();
            assert!(matches!(err, PqrsError::Validation(_)), "{field}");
            assert!(err.to_string().contains(field), "{field}: {err}");
            assert!(err.to_string().contains("must not exceed"), "{field}: {err}");
        }
    }

    #[test]
    fn test_attachment_rules() {
        let mut s = submission();
        s.attachment = Some(UploadedFile {
            file_name: "Orden.PDF".to_string(),
            bytes: vec![1, 2, 3],
        });
        let intake = s.validate(1024).unwrap();
        assert_eq!(intake.attachment, Some(("pdf".to_string(), vec![1, 2, 3])));

        let mut s = submission();
        s.attachment = Some(UploadedFile {
            file_name: "script.exe".to_string(),
            bytes: vec![1],
        });
        assert!(s.validate(1024).is_err());

        let mut s = submission();
        s.attachment = Some(UploadedFile {
            file_name: "scan.png".to_string(),
            bytes: vec![0; 2048],
        });
        assert!(s.validate(1024).is_err());

        let mut s = submission();
        s.attachment = Some(UploadedFile {
            file_name: "empty.pdf".to_string(),
            bytes: Vec::new(),
        });
        assert!(s.validate(1024).unwrap().attachment.is_none());
    }

    #[test]
    fn test_store_upload_uses_random_name() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadsConfig {
            root: dir.path().join("uploads"),
            public_root: dir.path().to_path_buf(),
        };
        let (name, path) = store_upload(&uploads, "pdf", b"%PDF").unwrap();
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), 36 + 4);
        assert_eq!(std::fs::read(path).unwrap(), b"%PDF");
    }
}
