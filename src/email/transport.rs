use std::time::Duration;

use lettre::{
    transport::smtp::authentication::Credentials, Message, SmtpTransport, Transport,
};
use log::{debug, info};

use crate::core::config::{EmailConfig, SmtpSecurity};
use crate::core::shared::error::PqrsError;

/// Anything that can hand a finished message to a mail server.
pub trait MailTransport: Send + Sync {
    fn deliver(&self, message: &Message) -> Result<(), PqrsError>;
}

/// SMTP transport built once at startup and shared by every dispatch.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self, PqrsError> {
        let host = config.smtp_host.trim();
        if host.is_empty() {
            return Err(PqrsError::Config("SMTP host is not configured".to_string()));
        }

        let builder = match config.security {
            SmtpSecurity::Ssl => SmtpTransport::relay(host)
                .map_err(|e| PqrsError::Config(format!("SMTP relay error: {e}")))?,
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(host)
                .map_err(|e| PqrsError::Config(format!("SMTP relay error: {e}")))?,
            SmtpSecurity::None => SmtpTransport::builder_dangerous(host),
        };

        let mut builder = builder
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if !config.smtp_username.is_empty() && !config.smtp_password.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        info!(
            "SMTP transport ready: {}:{} ({:?})",
            host, config.smtp_port, config.security
        );

        Ok(Self {
            transport: builder.build(),
        })
    }
}

impl MailTransport for SmtpMailer {
    fn deliver(&self, message: &Message) -> Result<(), PqrsError> {
        let response = self
            .transport
            .send(message)
            .map_err(|e| PqrsError::Mail(e.to_string()))?;
        debug!("SMTP accepted message: {:?}", response.code());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(security: SmtpSecurity) -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 2525,
            smtp_username: String::new(),
            smtp_password: String::new(),
            security,
            from_address: "pqrs@example.com".to_string(),
            from_name: "Sistema de PQRS".to_string(),
            audit_address: "audit@example.com".to_string(),
            timeout_secs: 5,
            max_attachment_bytes: 1024,
            local_offset_hours: -5,
        }
    }

    #[test]
    fn test_builds_for_every_security_mode() {
        for security in [SmtpSecurity::Ssl, SmtpSecurity::StartTls, SmtpSecurity::None] {
            assert!(SmtpMailer::from_config(&config(security)).is_ok());
        }
    }

    #[test]
    fn test_empty_host_is_config_error() {
        let mut cfg = config(SmtpSecurity::None);
        cfg.smtp_host = "  ".to_string();
        assert!(matches!(
            SmtpMailer::from_config(&cfg),
            Err(PqrsError::Config(_))
        ));
    }
}
