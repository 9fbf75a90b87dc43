use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{FixedOffset, Offset, Utc};
use lettre::Address;

use crate::core::shared::error::PqrsError;

pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub email: EmailConfig,
    pub uploads: UploadsConfig,
    pub session_ttl_hours: i64,
    pub bootstrap_admin: Option<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Implicit TLS, usually port 465.
    Ssl,
    /// STARTTLS upgrade, usually port 587.
    StartTls,
    None,
}

impl FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ssl" | "smtps" => Ok(Self::Ssl),
            "tls" | "starttls" => Ok(Self::StartTls),
            "none" | "" => Ok(Self::None),
            other => Err(format!("Unknown SMTP security mode: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub security: SmtpSecurity,
    pub from_address: String,
    pub from_name: String,
    /// Mailbox copied on every insurer notification.
    pub audit_address: String,
    pub timeout_secs: u64,
    pub max_attachment_bytes: u64,
    /// Offset used to turn stored UTC timestamps into local calendar dates.
    pub local_offset_hours: i32,
}

#[derive(Clone, Debug)]
pub struct UploadsConfig {
    pub root: PathBuf,
    /// Directory the stored paths were historically relative to.
    pub public_root: PathBuf,
}

impl EmailConfig {
    /// Sender and audit addresses must be usable before anything is sent.
    pub fn validate(&self) -> Result<(), PqrsError> {
        if self.smtp_host.trim().is_empty() {
            return Err(PqrsError::Config("SMTP host is not configured".to_string()));
        }
        if self.from_address.parse::<Address>().is_err() {
            return Err(PqrsError::Config(format!(
                "Sender address ({}) is not valid",
                if self.from_address.is_empty() {
                    "NOT DEFINED"
                } else {
                    &self.from_address
                }
            )));
        }
        if self.audit_address.parse::<Address>().is_err() {
            return Err(PqrsError::Config(format!(
                "Audit address ({}) is not valid",
                self.audit_address
            )));
        }
        Ok(())
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.local_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;

        let port: u16 = get("SERVER_PORT", "8080")
            .parse()
            .map_err(|e| anyhow!("Invalid SERVER_PORT: {e}"))?;

        let security: SmtpSecurity = get("SMTP_SECURE", "ssl")
            .parse()
            .map_err(|e: String| anyhow!(e))?;
        let default_smtp_port = match security {
            SmtpSecurity::Ssl => "465",
            SmtpSecurity::StartTls => "587",
            SmtpSecurity::None => "25",
        };

        let from_address = get("EMAIL_FROM_ADDRESS", "");

        let email = EmailConfig {
            smtp_host: get("SMTP_HOST", "localhost"),
            smtp_port: get("SMTP_PORT", default_smtp_port)
                .parse()
                .map_err(|e| anyhow!("Invalid SMTP_PORT: {e}"))?,
            smtp_username: get("SMTP_USERNAME", &from_address),
            smtp_password: get("SMTP_PASSWORD", ""),
            security,
            from_name: get("EMAIL_FROM_NAME", "Sistema de PQRS"),
            audit_address: get("AUDIT_EMAIL", ""),
            from_address,
            timeout_secs: get("SMTP_TIMEOUT", "30")
                .parse()
                .map_err(|e| anyhow!("Invalid SMTP_TIMEOUT: {e}"))?,
            max_attachment_bytes: get("SMTP_MAX_FILE_SIZE", &DEFAULT_MAX_ATTACHMENT_BYTES.to_string())
                .parse()
                .map_err(|e| anyhow!("Invalid SMTP_MAX_FILE_SIZE: {e}"))?,
            local_offset_hours: get("LOCAL_UTC_OFFSET_HOURS", "-5")
                .parse()
                .map_err(|e| anyhow!("Invalid LOCAL_UTC_OFFSET_HOURS: {e}"))?,
        };

        let uploads = UploadsConfig {
            root: PathBuf::from(get("UPLOADS_DIR", "./uploads")),
            public_root: PathBuf::from(get("PUBLIC_ROOT", ".")),
        };

        let bootstrap_admin = match (lookup("ADMIN_USERNAME"), lookup("ADMIN_PASSWORD")) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.is_empty() => {
                Some((user.trim().to_string(), pass))
            }
            _ => None,
        };

        Ok(AppConfig {
            server: ServerConfig {
                host: get("SERVER_HOST", "0.0.0.0"),
                port,
            },
            database_url,
            email,
            uploads,
            session_ttl_hours: get("SESSION_TTL_HOURS", "8")
                .parse()
                .map_err(|e| anyhow!("Invalid SESSION_TTL_HOURS: {e}"))?,
            bootstrap_admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_database_url_is_required() {
        assert!(AppConfig::from_lookup(lookup_from(&[])).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://u:p@localhost/pqrs"),
            ("EMAIL_FROM_ADDRESS", "pqrs@example.com"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.email.security, SmtpSecurity::Ssl);
        assert_eq!(config.email.smtp_port, 465);
        assert_eq!(config.email.smtp_username, "pqrs@example.com");
        assert_eq!(config.email.max_attachment_bytes, 10 * 1024 * 1024);
        assert_eq!(config.email.timeout_secs, 30);
        assert!(config.bootstrap_admin.is_none());
    }

    #[test]
    fn test_starttls_picks_submission_port() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/pqrs"),
            ("SMTP_SECURE", "tls"),
        ]))
        .unwrap();
        assert_eq!(config.email.security, SmtpSecurity::StartTls);
        assert_eq!(config.email.smtp_port, 587);
    }

    #[test]
    fn test_invalid_sender_fails_validation() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/pqrs"),
            ("EMAIL_FROM_ADDRESS", "not-an-address"),
            ("AUDIT_EMAIL", "audit@example.com"),
        ]))
        .unwrap();
        let err = config.email.validate().unwrap_err();
        assert!(err.to_string().contains("not-an-address"));
    }

    #[test]
    fn test_valid_email_config() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/pqrs"),
            ("EMAIL_FROM_ADDRESS", "pqrs@example.com"),
            ("AUDIT_EMAIL", "audit@example.com"),
        ]))
        .unwrap();
        assert!(config.email.validate().is_ok());
        assert_eq!(config.email.local_offset().local_minus_utc(), -5 * 3600);
    }
}
