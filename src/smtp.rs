//! Outbound sender: SMTP submission and reply/forward composition
//!
//! Built on `lettre`, the pack's dominant SMTP crate. Connection mode
//! (implicit SSL vs plaintext-then-STARTTLS) and the compose rules below
//! follow spec.md §4.7 exactly.

use lettre::message::{Attachment as LettreAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::db::{Account, Attachment, Message as StoredMessage};

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("message build failed: {0}")]
    Build(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type SmtpResult<T> = Result<T, SmtpError>;

/// A single outbound attachment payload (bytes supplied by the caller; no
/// attachment bytes are read back from storage since raw bytes are never
/// persisted).
pub struct OutboundAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct ComposeInput {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
    pub reply_to: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub attachments: Vec<OutboundAttachment>,
}

/// Resolve the `From` address: the account's human-facing address when it
/// looks like one, else its username.
fn from_address(account: &Account) -> String {
    match &account.account_address {
        Some(addr) if addr.contains('@') => addr.clone(),
        _ => account.username.clone(),
    }
}

fn parse_mailbox(addr: &str) -> SmtpResult<Mailbox> {
    addr.trim()
        .parse()
        .map_err(|e| SmtpError::InvalidAddress(format!("{addr}: {e}")))
}

/// Build the MIME message: `mixed` wrapping an `alternative` of plain+HTML,
/// plus base64 attachment parts. Bcc recipients are included in the RCPT
/// list but never emitted as a header.
fn build_message(account: &Account, input: &ComposeInput) -> SmtpResult<Message> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&from_address(account))?)
        .subject(&input.subject);

    for to in &input.to {
        builder = builder.to(parse_mailbox(to)?);
    }
    for cc in &input.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    for bcc in &input.bcc {
        // lettre tracks Bcc separately from headers; `.bcc()` does not add a
        // header but does add the address to the envelope recipients.
        builder = builder.bcc(parse_mailbox(bcc)?);
    }
    if let Some(reply_to) = &input.reply_to {
        builder = builder.reply_to(parse_mailbox(reply_to)?);
    }
    if let Some(in_reply_to) = &input.in_reply_to {
        builder = builder
            .header(lettre::message::header::ContentType::TEXT_PLAIN)
            .header(lettre::message::header::InReplyTo::from(in_reply_to.clone()));
    }
    if let Some(references) = &input.references {
        builder = builder.header(lettre::message::header::References::from(references.clone()));
    }

    let alternative = MultiPart::alternative_plain_html(
        input.body_plain.clone().unwrap_or_default(),
        input.body_html.clone().unwrap_or_default(),
    );

    let mut mixed = MultiPart::mixed().multipart(alternative);
    for attachment in &input.attachments {
        let content_type = attachment
            .content_type
            .parse()
            .map_err(|e| SmtpError::Build(format!("invalid content type: {e}")))?;
        mixed = mixed.singlepart(
            LettreAttachment::new(attachment.filename.clone())
                .body(attachment.data.clone(), content_type),
        );
    }

    builder
        .multipart(mixed)
        .map_err(|e| SmtpError::Build(e.to_string()))
}

/// Build a reply to a stored Message: `"Re: "`-prefixed subject (not
/// duplicated if already present), optional quoted original body, and
/// `In-Reply-To`/`References` pointed at the original Message-ID.
pub fn build_reply(
    original: &StoredMessage,
    body_plain: Option<String>,
    body_html: Option<String>,
    quote_original: bool,
) -> ComposeInput {
    let subject = if original
        .subject
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase()
        .starts_with("re:")
    {
        original.subject.clone().unwrap_or_default()
    } else {
        format!("Re: {}", original.subject.clone().unwrap_or_default())
    };

    let mut plain = body_plain.unwrap_or_default();
    let mut html = body_html;
    if quote_original {
        if let Some(original_plain) = &original.body_plain {
            plain.push_str("\n\n");
            for line in original_plain.lines() {
                plain.push_str("> ");
                plain.push_str(line);
                plain.push('\n');
            }
        }
        if let Some(original_html) = &original.body_html {
            let quoted = format!("<blockquote>{original_html}</blockquote>");
            html = Some(match html {
                Some(existing) => format!("{existing}<br/>{quoted}"),
                None => quoted,
            });
        }
    }

    ComposeInput {
        to: original.sender.clone().into_iter().collect(),
        subject,
        body_plain: Some(plain),
        body_html: html,
        in_reply_to: Some(original.message_id.clone()),
        references: Some(original.message_id.clone()),
        ..Default::default()
    }
}

/// Build a forward of a stored Message: `"Fwd: "`-prefixed subject, a
/// human-readable header block prepended to the body, and the original
/// attachments' extracted text content (not raw bytes, since none persist).
pub fn build_forward(
    original: &StoredMessage,
    original_attachments: &[Attachment],
    to: Vec<String>,
    extra_body: Option<String>,
) -> ComposeInput {
    let subject = format!("Fwd: {}", original.subject.clone().unwrap_or_default());

    let mut plain = extra_body.unwrap_or_default();
    plain.push_str("\n\n---------- Forwarded message ----------\n");
    plain.push_str(&format!("From: {}\n", original.sender.clone().unwrap_or_default()));
    plain.push_str(&format!("Date: {}\n", original.email_date));
    plain.push_str(&format!("Subject: {}\n", original.subject.clone().unwrap_or_default()));
    plain.push_str(&format!("To: {}\n\n", original.recipient.clone().unwrap_or_default()));
    plain.push_str(original.body_plain.as_deref().unwrap_or_default());

    for attachment in original_attachments {
        if let Some(text) = &attachment.text_content {
            plain.push_str(&format!("\n\n--- {} ---\n{text}", attachment.filename));
        }
    }

    ComposeInput {
        to,
        subject,
        body_plain: Some(plain),
        body_html: original.body_html.clone(),
        ..Default::default()
    }
}

/// Submit a message via SMTP using the account's settings. Defaults to
/// STARTTLS on port 587 when no explicit host/port override is given.
pub async fn send(account: &Account, input: &ComposeInput) -> SmtpResult<()> {
    let host = account
        .smtp_host
        .clone()
        .ok_or_else(|| SmtpError::Build("account has no SMTP host configured".to_owned()))?;
    let port = account.smtp_port.unwrap_or(587) as u16;

    let message = build_message(account, input)?;

    let credentials = Credentials::new(
        account.username.clone(),
        account.password.expose_secret().to_owned(),
    );

    // Mirrors imapclient.rs's connect policy: implicit TLS when
    // `smtp_use_ssl`, else plaintext-then-STARTTLS when `smtp_use_tls`, else
    // an unencrypted relay — two independent flags, not one.
    let transport = if account.smtp_use_ssl {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .map_err(|e| SmtpError::Transport(e.to_string()))?
            .port(port)
            .credentials(credentials)
            .build()
    } else if account.smtp_use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
            .map_err(|e| SmtpError::Transport(e.to_string()))?
            .port(port)
            .credentials(credentials)
            .build()
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
            .port(port)
            .credentials(credentials)
            .build()
    };

    transport
        .send(message)
        .await
        .map_err(|e| SmtpError::Transport(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_message() -> StoredMessage {
        StoredMessage {
            id: 1,
            account_id: 1,
            message_id: "<m1@example.com>".to_owned(),
            sender: Some("alice@example.com".to_owned()),
            recipient: Some("bob@example.com".to_owned()),
            subject: Some("Hello".to_owned()),
            email_date: Utc::now(),
            body_plain: Some("hi there".to_owned()),
            body_html: None,
            processed_at: Utc::now(),
            attachment_count: 0,
        }
    }

    #[test]
    fn reply_prefixes_subject_once() {
        let reply = build_reply(&sample_message(), None, None, false);
        assert_eq!(reply.subject, "Re: Hello");

        let mut already_replied = sample_message();
        already_replied.subject = Some("Re: Hello".to_owned());
        let reply = build_reply(&already_replied, None, None, false);
        assert_eq!(reply.subject, "Re: Hello");
    }

    #[test]
    fn reply_quotes_original_body_with_prefix() {
        let reply = build_reply(&sample_message(), Some("thanks".to_owned()), None, true);
        let body = reply.body_plain.unwrap();
        assert!(body.contains("thanks"));
        assert!(body.contains("> hi there"));
    }

    #[test]
    fn forward_prefixes_subject_and_includes_header_block() {
        let forward = build_forward(&sample_message(), &[], vec!["carol@example.com".to_owned()], None);
        assert_eq!(forward.subject, "Fwd: Hello");
        let body = forward.body_plain.unwrap();
        assert!(body.contains("From: alice@example.com"));
        assert!(body.contains("Forwarded message"));
    }
}
