#[derive(Debug)]
pub struct ApiUrls;

impl ApiUrls {
    // Health
    pub const HEALTH: &'static str = "/health";

    // Auth - JSON APIs
    pub const AUTH_LOGIN: &'static str = "/api/auth/login";
    pub const AUTH_LOGOUT: &'static str = "/api/auth/logout";
    pub const AUTH_SESSION: &'static str = "/api/auth/session";

    // Public intake
    pub const PQRS_SUBMIT: &'static str = "/api/pqrs";
    pub const PQRS_FORM_OPTIONS: &'static str = "/api/pqrs/form-options";
    pub const PQRS_CONFIRMATION: &'static str = "/api/pqrs/:id/confirmation";

    // Admin - tickets
    pub const ADMIN_PQRS: &'static str = "/api/admin/pqrs";
    pub const ADMIN_PQRS_BY_ID: &'static str = "/api/admin/pqrs/:id";
    pub const ADMIN_PQRS_EXPORT: &'static str = "/api/admin/pqrs/export";
    pub const ADMIN_PQRS_NOTIFIED: &'static str = "/api/admin/pqrs/notified";
    pub const ADMIN_PQRS_SEND_EMAIL: &'static str = "/api/admin/pqrs/send-email";

    // Admin - insurers
    pub const ADMIN_INSURERS: &'static str = "/api/admin/insurers";
    pub const ADMIN_INSURER_BY_ID: &'static str = "/api/admin/insurers/:id";
}

impl ApiUrls {
    /// Link returned to the public form after a successful submission.
    pub fn confirmation_for(id: i32) -> String {
        Self::PQRS_CONFIRMATION.replace(":id", &id.to_string())
    }
}
