use chrono::{FixedOffset, NaiveDate};

use crate::core::shared::models::{TicketDetails, TicketStatus};

use super::deadline::{local_date, LEGAL_RESPONSE_BUSINESS_DAYS};

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Response windows insurers must honor: kind of request, maximum time and
/// the cases it covers.
pub const LEGAL_RESPONSE_TIMES: &[(&str, &str, &str)] = &[
    (
        "Reclamos de riesgo simple",
        "72 horas",
        "Consultas médicas, generación de autorizaciones, etc.",
    ),
    (
        "Reclamos de riesgo priorizado",
        "48 horas",
        "Entrega de medicamentos",
    ),
    (
        "Reclamos de riesgo vital",
        "24 horas",
        "Remisiones, referencia, traslados, etc.",
    ),
    ("Solicitudes de información", "diez (10) días hábiles", ""),
    (
        "Copias",
        "dentro de los tres (3) días hábiles",
        "Si las copias son de historias clínicas o de exámenes y se requieren para una consulta o urgencia, serán catalogadas como reclamos",
    ),
];

pub const PATIENT_TRANSFER_NOTICE: &str =
    "Su PQRS ha sido trasladada a su EPS, quien deberá resolverla dentro de los términos de ley.";
pub const PATIENT_FOLLOW_UP_NOTICE: &str =
    "Por favor no responda a este correo. Pronto su EPS se comunicará con usted.";
pub const INSURER_REPLY_INSTRUCTION: &str = "Responder al correo registrado por el usuario con copia al correo de la auditoría dentro de los términos de ley.";

pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escapes and keeps the author's line breaks.
pub fn text_to_html(input: &str) -> String {
    html_escape(input)
        .replace("\r\n", "\n")
        .replace('\n', "<br>\n")
}

fn status_label(raw: &str) -> String {
    raw.parse::<TicketStatus>()
        .map(|s| s.label().to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn wrap_html(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"es\">\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n\
         <body style=\"font-family: Arial, sans-serif; color: #333; line-height: 1.5;\">\n{}\n</body>\n</html>",
        html_escape(title),
        body
    )
}

pub fn render_patient_email(
    details: &TicketDetails,
    extra_message: Option<&str>,
    offset: FixedOffset,
) -> RenderedEmail {
    let subject = format!("Respuesta a su PQRS #{}", details.id);
    let response = details.response.as_deref().unwrap_or_default();
    let extra = extra_message.map(str::trim).filter(|m| !m.is_empty());
    let created = format_date(local_date(details.created_at, offset));
    let status = status_label(&details.status);

    let mut html = String::new();
    html.push_str(&format!(
        "<h2>Respuesta a su PQRS #{}</h2>\n<p>Estimado(a) {}:</p>\n",
        details.id,
        html_escape(&details.patient_name)
    ));
    html.push_str(
        "<p>Le informamos que su solicitud ha sido atendida. A continuación encontrará la respuesta:</p>\n",
    );
    html.push_str(&format!(
        "<div style=\"background: #f5f5f5; padding: 12px; border-left: 4px solid #2c7be5;\">{}</div>\n",
        text_to_html(response)
    ));
    if let Some(extra) = extra {
        html.push_str(&format!(
            "<p><strong>Mensaje adicional:</strong><br>\n{}</p>\n",
            text_to_html(extra)
        ));
    }
    html.push_str(&format!("<p>{PATIENT_TRANSFER_NOTICE}</p>\n"));
    html.push_str("<h3>Datos de su solicitud</h3>\n<table cellpadding=\"4\">\n");
    for (label, value) in [
        ("Radicado", details.id.to_string()),
        ("Fecha de radicación", created.clone()),
        ("Tipo", details.complaint_type_name.clone()),
        ("EPS", details.insurer_name.clone()),
        ("Ciudad", details.city_name.clone()),
        ("Estado", status.clone()),
    ] {
        html.push_str(&format!(
            "<tr><td><strong>{}</strong></td><td>{}</td></tr>\n",
            label,
            html_escape(&value)
        ));
    }
    html.push_str(&format!(
        "</table>\n<p>{PATIENT_FOLLOW_UP_NOTICE}</p>\n<p>Cordialmente,<br>\nSistema de PQRS</p>"
    ));

    let mut text = format!(
        "Respuesta a su PQRS #{}\n\nEstimado(a) {}:\n\nLe informamos que su solicitud ha sido atendida. \
         A continuación encontrará la respuesta:\n\n{}\n",
        details.id, details.patient_name, response
    );
    if let Some(extra) = extra {
        text.push_str(&format!("\nMensaje adicional:\n{extra}\n"));
    }
    text.push_str(&format!("\n{PATIENT_TRANSFER_NOTICE}\n"));
    text.push_str(&format!(
        "\nRadicado: {}\nFecha de radicación: {}\nTipo: {}\nEPS: {}\nCiudad: {}\nEstado: {}\n\n\
         {PATIENT_FOLLOW_UP_NOTICE}\n\nCordialmente,\nSistema de PQRS\n",
        details.id,
        created,
        details.complaint_type_name,
        details.insurer_name,
        details.city_name,
        status
    ));

    RenderedEmail {
        html: wrap_html(&subject, &html),
        subject,
        text,
    }
}

pub fn render_insurer_email(
    details: &TicketDetails,
    deadline: NaiveDate,
    has_attachment: bool,
    offset: FixedOffset,
) -> RenderedEmail {
    let subject = format!("Nueva PQRS registrada #{}", details.id);
    let created = format_date(local_date(details.created_at, offset));
    let deadline = format_date(deadline);

    let mut html = String::new();
    html.push_str(&format!(
        "<h2>Nueva PQRS registrada #{}</h2>\n<p>Señores {}:</p>\n\
         <p>Se ha registrado una PQRS que requiere su atención.</p>\n",
        details.id,
        html_escape(&details.insurer_name)
    ));
    html.push_str("<table cellpadding=\"4\">\n");
    for (label, value) in [
        ("Radicado", details.id.to_string()),
        ("Fecha de radicación", created.clone()),
        ("Paciente", details.patient_name.clone()),
        ("Documento", details.document_id.clone()),
        ("Teléfono", details.phone.clone()),
        ("Correo", details.email.clone().unwrap_or_default()),
        ("Ciudad", details.city_name.clone()),
        ("Tipo", details.complaint_type_name.clone()),
    ] {
        html.push_str(&format!(
            "<tr><td><strong>{}</strong></td><td>{}</td></tr>\n",
            label,
            html_escape(&value)
        ));
    }
    html.push_str("</table>\n");
    html.push_str(&format!(
        "<h3>Descripción</h3>\n<p>{}</p>\n",
        text_to_html(&details.description)
    ));
    html.push_str(
        "<h3>Tiempos legales de respuesta</h3>\n<table border=\"1\" cellpadding=\"4\" style=\"border-collapse: collapse;\">\n\
         <tr><th>Tipo de solicitud</th><th>Tiempo máximo</th><th>Casos</th></tr>\n",
    );
    for (kind, time, cases) in LEGAL_RESPONSE_TIMES {
        html.push_str(&format!(
            "<tr><td>{kind}</td><td>{time}</td><td>{cases}</td></tr>\n"
        ));
    }
    html.push_str("</table>\n");
    html.push_str(&format!(
        "<p><strong>Fecha límite de respuesta ({} días hábiles): {}</strong></p>\n",
        LEGAL_RESPONSE_BUSINESS_DAYS, deadline
    ));
    if has_attachment {
        html.push_str("<p>Se adjunta archivo enviado por el usuario.</p>\n");
    }
    html.push_str(&format!(
        "<p><strong>{INSURER_REPLY_INSTRUCTION}</strong></p>\n<p>Cordialmente,<br>\nSistema de PQRS</p>"
    ));

    let mut text = format!(
        "Nueva PQRS registrada #{}\n\nSeñores {}:\n\nSe ha registrado una PQRS que requiere su atención.\n\n\
         Radicado: {}\nFecha de radicación: {}\nPaciente: {}\nDocumento: {}\nTeléfono: {}\nCorreo: {}\n\
         Ciudad: {}\nTipo: {}\n\nDescripción:\n{}\n\nTiempos legales de respuesta:\n",
        details.id,
        details.insurer_name,
        details.id,
        created,
        details.patient_name,
        details.document_id,
        details.phone,
        details.email.as_deref().unwrap_or_default(),
        details.city_name,
        details.complaint_type_name,
        details.description
    );
    for (kind, time, cases) in LEGAL_RESPONSE_TIMES {
        if cases.is_empty() {
            text.push_str(&format!("- {kind}: {time}\n"));
        } else {
            text.push_str(&format!("- {kind}: {time} ({cases})\n"));
        }
    }
    text.push_str(&format!(
        "\nFecha límite de respuesta ({LEGAL_RESPONSE_BUSINESS_DAYS} días hábiles): {deadline}\n"
    ));
    if has_attachment {
        text.push_str("\nSe adjunta archivo enviado por el usuario.\n");
    }
    text.push_str(&format!(
        "\n{INSURER_REPLY_INSTRUCTION}\n\nCordialmente,\nSistema de PQRS\n"
    ));

    RenderedEmail {
        html: wrap_html(&subject, &html),
        subject,
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn details() -> TicketDetails {
        TicketDetails {
            id: 42,
            patient_name: "Ana <Pérez>".to_string(),
            document_id: "1020".to_string(),
            email: Some("ana@example.com".to_string()),
            phone: "3001234567".to_string(),
            description: "Cita negada\nsegunda línea".to_string(),
            attachment_path: None,
            status: "resolved".to_string(),
            response: Some("Se reprogramó la cita & se notificó".to_string()),
            created_at: Utc.with_ymd_and_hms(2025, 5, 5, 15, 0, 0).unwrap(),
            notified: false,
            insurer_id: 3,
            city_name: "Cali".to_string(),
            insurer_name: "EPS Sur".to_string(),
            complaint_type_name: "Queja".to_string(),
        }
    }

    fn bogota() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            html_escape("<a href=\"x\">&'</a>"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
        assert_eq!(text_to_html("a\r\nb"), "a<br>\nb");
    }

    #[test]
    fn test_patient_email() {
        let email = render_patient_email(&details(), Some("  Gracias  "), bogota());
        assert_eq!(email.subject, "Respuesta a su PQRS #42");
        assert!(email.html.contains("Ana &lt;Pérez&gt;"));
        assert!(email.html.contains("Se reprogramó la cita &amp; se notificó"));
        assert!(email.html.contains("Mensaje adicional"));
        assert!(email.html.contains("Resuelto"));
        assert!(email.text.contains("Mensaje adicional:\nGracias"));
        assert!(email.text.contains("05/05/2025"));
        for notice in [PATIENT_TRANSFER_NOTICE, PATIENT_FOLLOW_UP_NOTICE] {
            assert!(email.html.contains(notice));
            assert!(email.text.contains(notice));
        }
    }

    #[test]
    fn test_patient_email_without_extra() {
        let email = render_patient_email(&details(), Some("   "), bogota());
        assert!(!email.html.contains("Mensaje adicional"));
        assert!(!email.text.contains("Mensaje adicional"));
    }

    #[test]
    fn test_insurer_email() {
        let deadline = NaiveDate::from_ymd_opt(2025, 5, 26).unwrap();
        let email = render_insurer_email(&details(), deadline, true, bogota());
        assert_eq!(email.subject, "Nueva PQRS registrada #42");
        assert!(email.html.contains("26/05/2025"));
        assert!(email.html.contains(INSURER_REPLY_INSTRUCTION));
        assert!(email.text.contains(INSURER_REPLY_INSTRUCTION));
        assert!(email.html.contains("Cita negada<br>\nsegunda línea"));
        assert!(email.html.contains("Se adjunta archivo enviado por el usuario."));
        assert!(email.text.contains("Documento: 1020"));

        let email = render_insurer_email(&details(), deadline, false, bogota());
        assert!(!email.text.contains("Se adjunta"));
    }

    #[test]
    fn test_legal_response_times_per_request_kind() {
        let deadline = NaiveDate::from_ymd_opt(2025, 5, 26).unwrap();
        let email = render_insurer_email(&details(), deadline, false, bogota());

        for expected in [
            "- Reclamos de riesgo simple: 72 horas (Consultas médicas",
            "- Reclamos de riesgo priorizado: 48 horas (Entrega de medicamentos)",
            "- Reclamos de riesgo vital: 24 horas (Remisiones, referencia, traslados",
            "- Solicitudes de información: diez (10) días hábiles\n",
            "- Copias: dentro de los tres (3) días hábiles (Si las copias son de historias clínicas",
        ] {
            assert!(email.text.contains(expected), "missing line: {expected}");
        }
        assert!(email
            .html
            .contains("<tr><td>Reclamos de riesgo vital</td><td>24 horas</td>"));
        assert!(!email.text.contains("riesgo vital: 72"));
    }
}
