use axum::{
    extract::rejection::FormRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

#[derive(Debug, thiserror::Error)]
pub enum PqrsError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Email configuration error: {0}")]
    Config(String),
    #[error("Attachment error: {0}")]
    Attachment(String),
    #[error("Error sending email: {0}")]
    Mail(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PqrsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Attachment(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Mail(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<diesel::result::Error> for PqrsError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound("Record not found".to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for PqrsError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Database(format!("Connection pool error: {e}"))
    }
}

impl From<std::io::Error> for PqrsError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(format!("IO error: {e}"))
    }
}

impl From<tokio::task::JoinError> for PqrsError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Task join error: {e}"))
    }
}

impl IntoResponse for PqrsError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{self}");
        }
        (
            status,
            Json(serde_json::json!({ "success": false, "message": self.to_string() })),
        )
            .into_response()
    }
}

/// Error body for the AJAX endpoints of the admin console, which only ever
/// answer 401 or 500.
#[derive(Debug)]
pub struct AjaxError(pub PqrsError);

impl From<PqrsError> for AjaxError {
    fn from(e: PqrsError) -> Self {
        Self(e)
    }
}

impl From<FormRejection> for AjaxError {
    fn from(rejection: FormRejection) -> Self {
        Self(PqrsError::validation(format!(
            "Invalid form data: {}",
            rejection.body_text()
        )))
    }
}

impl IntoResponse for AjaxError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            PqrsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        log::warn!("AJAX request failed: {}", self.0);
        (
            status,
            Json(serde_json::json!({ "success": false, "message": self.0.to_string() })),
        )
            .into_response()
    }
}
