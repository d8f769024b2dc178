//! Canonicalization pipeline: turn one raw RFC 822 message into a stored
//! Message + Attachment rows
//!
//! The Message-ID idempotency pre-check, the insert, and the attachment
//! inserts all happen inside [`crate::db::upsert_message`]'s single
//! transaction — a partially-ingested message is never observable.

use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use sqlx::PgPool;
use tracing::warn;

use crate::attachments::{self, ProcessedAttachment};
use crate::db::{self, DbResult, NewAttachment, NewMessage};
use crate::extract::Extractor;
use crate::policy::PolicyView;

const HEADER_CLAMP_CHARS: usize = 500;

/// Outcome of attempting to ingest one message.
pub enum IngestOutcome {
    /// Inserted a new Message with this many attachments.
    Inserted { message_id: i64, attachment_count: usize },
    /// A Message with this Message-ID already existed; treated as a no-op.
    Duplicate,
}

/// Compute the Message-ID: use the header if present, else synthesize
/// `uid_<uid>_<account id>`.
pub fn compute_message_id(headers: &[mailparse::MailHeader<'_>], uid: u32, account_id: i64) -> String {
    headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("uid_{uid}_{account_id}"))
}

/// Truncate a string to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        input
    } else {
        input.chars().take(max_chars).collect()
    }
}

fn clamp_header(value: Option<String>) -> Option<String> {
    value.map(|v| truncate_chars(v, HEADER_CLAMP_CHARS))
}

/// Parse an RFC 2822 date, falling back to "now" in UTC on failure.
fn parse_origin_date(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| mailparse::dateparse(v).ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now)
}

/// Strip HTML tags down to a plain-text approximation, used only when a
/// message has no `text/plain` part.
fn html_to_plain(html: &str) -> String {
    html2text::from_read(html.as_bytes(), usize::MAX)
        .unwrap_or_default()
        .trim()
        .to_owned()
}

/// Canonicalize and upsert one raw message. Returns `Duplicate` without
/// touching storage beyond the pre-check when the Message-ID already exists.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_message(
    pool: &PgPool,
    account_id: i64,
    uid: u32,
    raw: &[u8],
    policy: &PolicyView,
    extractor: &Extractor,
    max_attachment_text_chars: usize,
) -> DbResult<IngestOutcome> {
    let parsed = mailparse::parse_mail(raw)
        .map_err(|e| db::DbError::Query(sqlx::Error::Protocol(format!("malformed message: {e}"))))?;

    let message_id = compute_message_id(&parsed.headers, uid, account_id);

    let sender = clamp_header(parsed.headers.get_first_value("From"));
    let recipient = clamp_header(parsed.headers.get_first_value("To"));
    let subject = clamp_header(parsed.headers.get_first_value("Subject"));
    let email_date = parse_origin_date(parsed.headers.get_first_value("Date").as_deref());

    let (body_plain, body_html) = extract_bodies(&parsed);
    let canonical_plain = match &body_plain {
        Some(p) if !p.is_empty() => body_plain.clone(),
        _ => body_html.as_deref().map(html_to_plain),
    };

    let processed: Vec<ProcessedAttachment> = attachments::process_attachments(
        &parsed,
        &message_id,
        policy,
        extractor,
        max_attachment_text_chars,
    );

    let new_message = NewMessage {
        account_id,
        message_id,
        sender,
        recipient,
        subject,
        email_date,
        body_plain: canonical_plain,
        body_html,
    };
    let new_attachments: Vec<NewAttachment> = processed
        .into_iter()
        .map(|a| NewAttachment {
            filename: a.filename,
            content_type: a.content_type,
            content_id: a.content_id,
            size: a.size,
            text_content: a.text_content,
        })
        .collect();

    match db::upsert_message(pool, &new_message, &new_attachments).await? {
        Some((stored, stored_attachments)) => Ok(IngestOutcome::Inserted {
            message_id: stored.id,
            attachment_count: stored_attachments.len(),
        }),
        None => Ok(IngestOutcome::Duplicate),
    }
}

/// Walk MIME parts, accumulating `text/plain` into one body and `text/html`
/// into the other; each part is decoded as UTF-8 with replacement.
fn extract_bodies(parsed: &mailparse::ParsedMail<'_>) -> (Option<String>, Option<String>) {
    let mut plain = String::new();
    let mut html = String::new();
    walk_bodies(parsed, &mut plain, &mut html);

    let plain = if plain.is_empty() { None } else { Some(plain) };
    let html = if html.is_empty() { None } else { Some(html) };
    (plain, html)
}

fn walk_bodies(part: &mailparse::ParsedMail<'_>, plain: &mut String, html: &mut String) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_bodies(sub, plain, html);
        }
        return;
    }

    let ctype = part.ctype.mimetype.to_ascii_lowercase();
    let disposition = part.get_content_disposition();
    let is_attachment = disposition.disposition == mailparse::DispositionType::Attachment;
    if is_attachment {
        return;
    }

    match ctype.as_str() {
        "text/plain" => {
            if let Ok(body) = part.get_body() {
                plain.push_str(&body);
            } else if let Ok(raw) = part.get_body_raw() {
                warn!("text/plain part failed UTF-8 decode cleanly, using lossy conversion");
                plain.push_str(&String::from_utf8_lossy(&raw));
            }
        }
        "text/html" => {
            if let Ok(body) = part.get_body() {
                html.push_str(&body);
            } else if let Ok(raw) = part.get_body_raw() {
                html.push_str(&String::from_utf8_lossy(&raw));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_message_id_when_header_absent() {
        let raw = b"From: a@x\r\nTo: b@y\r\nSubject: hi\r\n\r\nbody";
        let parsed = mailparse::parse_mail(raw).unwrap();
        let id = compute_message_id(&parsed.headers, 42, 7);
        assert_eq!(id, "uid_42_7");
    }

    #[test]
    fn uses_header_message_id_when_present() {
        let raw = b"Message-ID: <m1@example.com>\r\nFrom: a@x\r\n\r\nbody";
        let parsed = mailparse::parse_mail(raw).unwrap();
        let id = compute_message_id(&parsed.headers, 42, 7);
        assert_eq!(id, "<m1@example.com>");
    }

    #[test]
    fn clamps_long_headers_to_500_chars() {
        let long = "x".repeat(600);
        let clamped = clamp_header(Some(long)).unwrap();
        assert_eq!(clamped.chars().count(), 500);
    }

    #[test]
    fn extract_bodies_accumulates_plain_and_html_separately() {
        let raw = b"Content-Type: multipart/alternative; boundary=B\r\n\r\n--B\r\nContent-Type: text/plain\r\n\r\nhello\r\n--B\r\nContent-Type: text/html\r\n\r\n<p>hi</p>\r\n--B--";
        let parsed = mailparse::parse_mail(raw).unwrap();
        let (plain, html) = extract_bodies(&parsed);
        assert_eq!(plain.as_deref(), Some("hello"));
        assert_eq!(html.as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn falls_back_to_now_on_unparseable_date() {
        let before = Utc::now();
        let parsed_date = parse_origin_date(Some("not a date"));
        assert!(parsed_date >= before);
    }
}
