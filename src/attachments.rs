//! Attachment processor: classifies and extracts attachment parts of a
//! canonicalized message
//!
//! Mirrors `original_source/src/email/attachment_handler.py`'s filename
//! sanitization exactly, generalized from its Python duck-typed `email`
//! module walk to `mailparse::ParsedMail`.

use mailparse::{DispositionType, ParsedMail};
use tracing::warn;

use crate::extract::Extractor;
use crate::policy::{self, PolicyView};

#[derive(Debug, Clone)]
pub struct ProcessedAttachment {
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub size: i64,
    pub text_content: Option<String>,
}

/// A part is an attachment when it carries a filename, an explicit
/// `Content-Disposition: attachment`, or a top-level type of image/audio/
/// video/application (spec.md §4.4).
fn is_attachment(part: &ParsedMail<'_>, filename: &Option<String>, content_type: &str) -> bool {
    let disposition = part.get_content_disposition();
    if filename.is_some() || disposition.disposition == DispositionType::Attachment {
        return true;
    }
    let top_level = content_type.split('/').next().unwrap_or("");
    matches!(top_level, "image" | "audio" | "video" | "application")
}

/// Walk every leaf part of the message, process attachments, and return them
/// in document order.
pub fn process_attachments(
    parsed: &ParsedMail<'_>,
    message_id: &str,
    policy: &PolicyView,
    extractor: &Extractor,
    max_attachment_text_chars: usize,
) -> Vec<ProcessedAttachment> {
    let mut out = Vec::new();
    walk(parsed, message_id, policy, extractor, max_attachment_text_chars, &mut out);
    out
}

fn walk(
    part: &ParsedMail<'_>,
    message_id: &str,
    policy: &PolicyView,
    extractor: &Extractor,
    max_attachment_text_chars: usize,
    out: &mut Vec<ProcessedAttachment>,
) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk(sub, message_id, policy, extractor, max_attachment_text_chars, out);
        }
        return;
    }

    let content_type = part.ctype.mimetype.to_ascii_lowercase();
    if content_type == "multipart" {
        return;
    }
    let disposition = part.get_content_disposition();
    let filename = disposition
        .params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned());

    if !is_attachment(part, &filename, &content_type) {
        return;
    }

    let payload = match part.get_body_raw() {
        Ok(p) => p,
        Err(e) => {
            warn!(message_id, error = %e, "failed decoding attachment payload, skipping");
            return;
        }
    };
    if payload.is_empty() {
        warn!(message_id, filename = ?filename, "empty attachment payload, skipping");
        return;
    }

    let resolved_name = filename.unwrap_or_else(|| format!("attachment_{message_id}_unknown"));
    let sanitized = sanitize_filename(&resolved_name);

    let content_id = part
        .headers
        .iter()
        .find(|h| h.get_key().eq_ignore_ascii_case("content-id"))
        .map(|h| h.get_value().trim_matches(|c| c == '<' || c == '>').to_owned());

    let text_content = if policy::should_extract_text(policy, &content_type) {
        extractor.extract(&payload, &content_type, max_attachment_text_chars)
    } else {
        None
    };

    out.push(ProcessedAttachment {
        filename: sanitized,
        content_type,
        content_id,
        size: payload.len() as i64,
        text_content,
    });
}

/// Sanitize a filename for safe storage, grounded in
/// `AttachmentHandler._sanitize_filename`: replace a conservative set of
/// filesystem-hostile characters with `_`, truncate to 100 chars splitting
/// at the extension, and substitute a fallback when left empty.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized: String = filename
        .chars()
        .map(|c| if "<>:\"/\\|?*".contains(c) { '_' } else { c })
        .collect();

    if sanitized.chars().count() > 100 {
        let (stem, ext) = split_extension(&sanitized);
        let truncated_stem: String = stem.chars().take(95).collect();
        sanitized = format!("{truncated_stem}{ext}");
    }

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "unnamed_attachment".to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_replaces_hostile_characters() {
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn sanitize_filename_truncates_preserving_extension() {
        let long_stem = "a".repeat(150);
        let name = format!("{long_stem}.txt");
        let sanitized = sanitize_filename(&name);
        assert_eq!(sanitized.chars().count(), 95 + 4);
        assert!(sanitized.ends_with(".txt"));
    }

    #[test]
    fn sanitize_filename_substitutes_fallback_when_empty() {
        assert_eq!(sanitize_filename("   "), "unnamed_attachment");
        assert_eq!(sanitize_filename(""), "unnamed_attachment");
    }
}
