use crate::core::config::{EmailConfig, UploadsConfig};
use crate::core::session::AdminContext;
use crate::core::shared::error::{AjaxError, PqrsError};
use crate::core::shared::models::TicketDetails;
use crate::core::shared::state::AppState;
use crate::core::urls::ApiUrls;
use axum::{
    extract::{rejection::FormRejection, Form, State},
    routing::post,
    Json, Router,
};
use lettre::message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

pub mod attachments;
pub mod deadline;
pub mod store;
pub mod templates;
pub mod transport;

pub use attachments::ResolvedAttachment;
pub use store::{NotificationStore, PgNotificationStore};
pub use transport::{MailTransport, SmtpMailer};

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route(ApiUrls::ADMIN_PQRS_SEND_EMAIL, post(send_ticket_email))
}

/// Outcome of one successful dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub ticket_id: i32,
    pub patient_recipient: String,
    pub insurer_recipients: Vec<String>,
    pub cc: String,
    pub attachment: Option<String>,
}

/// Sends the patient reply and the insurer notification for a ticket, then
/// flags the ticket as notified.
pub struct Notifier {
    store: Arc<dyn NotificationStore>,
    transport: Arc<dyn MailTransport>,
    config: EmailConfig,
    uploads: UploadsConfig,
    in_flight: Mutex<HashSet<i32>>,
}

struct DispatchGuard<'a> {
    in_flight: &'a Mutex<HashSet<i32>>,
    ticket_id: i32,
}

impl<'a> DispatchGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<i32>>, ticket_id: i32) -> Result<Self, PqrsError> {
        let mut set = in_flight
            .lock()
            .map_err(|_| PqrsError::Internal("Dispatch registry poisoned".to_string()))?;
        if !set.insert(ticket_id) {
            return Err(PqrsError::Conflict(format!(
                "A notification for ticket {ticket_id} is already being sent"
            )));
        }
        Ok(Self {
            in_flight,
            ticket_id,
        })
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.ticket_id);
        }
    }
}

impl Notifier {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        transport: Arc<dyn MailTransport>,
        config: EmailConfig,
        uploads: UploadsConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            uploads,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn dispatch(
        &self,
        ticket_id: i32,
        extra_message: Option<&str>,
    ) -> Result<DispatchReport, PqrsError> {
        self.run_dispatch(ticket_id, extra_message).map_err(|e| {
            error!("Notification for ticket {ticket_id} failed: {e}");
            e
        })
    }

    fn run_dispatch(
        &self,
        ticket_id: i32,
        extra_message: Option<&str>,
    ) -> Result<DispatchReport, PqrsError> {
        if ticket_id <= 0 {
            return Err(PqrsError::validation("Invalid ticket id"));
        }
        let _guard = DispatchGuard::acquire(&self.in_flight, ticket_id)?;

        self.config.validate()?;
        let sender = self.sender()?;
        let audit = parse_mailbox(&self.config.audit_address).map_err(|_| {
            PqrsError::Config(format!(
                "Audit address ({}) is not valid",
                self.config.audit_address
            ))
        })?;

        let details = self
            .store
            .load_ticket_details(ticket_id)?
            .ok_or_else(|| PqrsError::not_found(format!("Ticket {ticket_id} not found")))?;

        let patient_email = details
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| PqrsError::validation("The ticket has no patient email"))?
            .to_string();
        let patient = parse_mailbox(&patient_email).map_err(|_| {
            PqrsError::validation(format!("Patient email ({patient_email}) is not valid"))
        })?;

        if details
            .response
            .as_deref()
            .map_or(true, |r| r.trim().is_empty())
        {
            return Err(PqrsError::validation(
                "The ticket has no response to send",
            ));
        }

        let insurer_emails = self.store.active_insurer_emails(details.insurer_id)?;
        if insurer_emails.is_empty() {
            return Err(PqrsError::validation(format!(
                "Insurer {} has no active notification emails",
                details.insurer_name
            )));
        }
        let insurer_recipients = insurer_emails
            .iter()
            .map(|e| {
                parse_mailbox(e).map_err(|_| {
                    PqrsError::validation(format!("Insurer email ({e}) is not valid"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let attachment = match details
            .attachment_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
        {
            Some(stored) => Some(attachments::resolve_attachment(
                &self.uploads,
                stored,
                self.config.max_attachment_bytes,
            )?),
            None => None,
        };

        let offset = self.config.local_offset();

        let patient_email_body =
            templates::render_patient_email(&details, extra_message, offset);
        let message = build_message(
            &sender,
            std::slice::from_ref(&patient),
            None,
            &patient_email_body,
            attachment.as_ref(),
        )?;
        self.transport.deliver(&message)?;
        info!("Ticket {ticket_id}: patient email sent to {patient_email}");

        let deadline = deadline::legal_deadline(details.created_at, offset);
        let insurer_email_body = templates::render_insurer_email(
            &details,
            deadline,
            attachment.is_some(),
            offset,
        );
        let message = build_message(
            &sender,
            &insurer_recipients,
            Some(&audit),
            &insurer_email_body,
            attachment.as_ref(),
        )?;
        self.transport.deliver(&message)?;
        info!(
            "Ticket {ticket_id}: insurer email sent to {} recipient(s), cc {}",
            insurer_recipients.len(),
            self.config.audit_address
        );

        self.store.mark_notified(ticket_id)?;
        info!("Ticket {ticket_id} marked as notified");

        Ok(report(&details, patient_email, insurer_emails, &self.config, attachment))
    }

    fn sender(&self) -> Result<Mailbox, PqrsError> {
        let address: Address = self.config.from_address.parse().map_err(|_| {
            PqrsError::Config(format!(
                "Sender address ({}) is not valid",
                self.config.from_address
            ))
        })?;
        let name = self.config.from_name.trim();
        Ok(Mailbox::new(
            (!name.is_empty()).then(|| name.to_string()),
            address,
        ))
    }
}

fn report(
    details: &TicketDetails,
    patient_recipient: String,
    insurer_recipients: Vec<String>,
    config: &EmailConfig,
    attachment: Option<ResolvedAttachment>,
) -> DispatchReport {
    DispatchReport {
        ticket_id: details.id,
        patient_recipient,
        insurer_recipients,
        cc: config.audit_address.clone(),
        attachment: attachment.map(|a| a.file_name),
    }
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, lettre::address::AddressError> {
    let address: Address = raw.trim().parse()?;
    Ok(Mailbox::new(None, address))
}

/// Builds one immutable message: a plain/HTML alternative, wrapped in a
/// mixed part when a file goes along.
pub fn build_message(
    sender: &Mailbox,
    to: &[Mailbox],
    cc: Option<&Mailbox>,
    body: &templates::RenderedEmail,
    attachment: Option<&ResolvedAttachment>,
) -> Result<Message, PqrsError> {
    let mut builder = Message::builder()
        .from(sender.clone())
        .reply_to(sender.clone())
        .subject(body.subject.clone());
    for recipient in to {
        builder = builder.to(recipient.clone());
    }
    if let Some(cc) = cc {
        builder = builder.cc(cc.clone());
    }

    let alternative = MultiPart::alternative()
        .singlepart(SinglePart::plain(body.text.clone()))
        .singlepart(SinglePart::html(body.html.clone()));

    let result = match attachment {
        Some(file) => {
            let content_type = ContentType::parse(&file.content_type)
                .or_else(|_| ContentType::parse("application/octet-stream"))
                .map_err(|e| PqrsError::Attachment(format!("Invalid content type: {e}")))?;
            let part = Attachment::new(file.file_name.clone()).body(file.bytes.clone(), content_type);
            builder.multipart(MultiPart::mixed().multipart(alternative).singlepart(part))
        }
        None => builder.multipart(alternative),
    };

    result.map_err(|e| PqrsError::Mail(format!("Failed to build email: {e}")))
}

#[derive(Debug, Deserialize)]
pub struct SendEmailForm {
    pub ticket_id: Option<String>,
    pub message: Option<String>,
}

pub async fn send_ticket_email(
    State(state): State<Arc<AppState>>,
    ctx: AdminContext,
    form: Result<Form<SendEmailForm>, FormRejection>,
) -> Result<Json<serde_json::Value>, AjaxError> {
    if !ctx.is_admin() {
        warn!("{} tried to send ticket emails without admin role", ctx.username);
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
    let extra = form.message.filter(|m| !m.trim().is_empty());

    info!("{} requested notification for ticket {ticket_id}", ctx.username);

    let notifier = state.notifier.clone();
    let report = tokio::task::spawn_blocking(move || notifier.dispatch(ticket_id, extra.as_deref()))
        .await
        .map_err(PqrsError::from)??;

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Emails sent successfully",
        "report": report,
    })))
}
