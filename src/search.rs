//! Search engine: SQL-filter-first, in-process regex predicate
//!
//! Filters (date range, account, participant, has_attachments, …) are
//! pushed into SQL via `sqlx::QueryBuilder`; the query regex itself is
//! evaluated in Rust over the filtered candidate set, since Postgres has no
//! portable operator with the exact semantics (and safety limits) of the
//! `regex` crate. This redesign is recorded in DESIGN.md.

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use sqlx::{PgPool, QueryBuilder};

use crate::db::{self, Account, Attachment, DbResult, Message};
use crate::errors::{AppError, AppResult};

pub const MAX_PATTERN_LENGTH: usize = 500;
pub const HARD_LIMIT: i64 = 100;
const PREVIEW_RADIUS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Sender,
    Subject,
    Body,
    Attachment,
}

impl SearchField {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "sender" => Some(Self::Sender),
            "subject" => Some(Self::Subject),
            "body" => Some(Self::Body),
            "attachment" => Some(Self::Attachment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    EmailDate,
    ProcessedAt,
    Sender,
    Subject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub query: String,
    pub field: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub account_id: Option<i64>,
    pub has_attachments: Option<bool>,
    pub participant: Option<String>,
    pub from_me: bool,
    pub to_me: bool,
    pub search_attachments: bool,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub message: Message,
    pub attachments: Vec<Attachment>,
    pub matched_field: &'static str,
    pub preview: String,
}

/// Validate and compile the query regex. Empty query bypasses compilation
/// (no filtering by content; every candidate matches with `field="metadata"`).
fn compile_query(query: &str) -> AppResult<Option<Regex>> {
    if query.is_empty() {
        return Ok(None);
    }
    if query.len() > MAX_PATTERN_LENGTH {
        return Err(AppError::invalid(format!(
            "query exceeds {MAX_PATTERN_LENGTH} characters"
        )));
    }
    if query.contains('\0') {
        return Err(AppError::invalid("query contains NUL bytes"));
    }
    RegexBuilder::new(query)
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| AppError::invalid(format!("invalid regex: {e}")))
}

/// Run the search: build the SQL filter, fetch candidates, apply the regex
/// predicate in-process, sort, and paginate (hard-capped at 100).
pub async fn search(pool: &PgPool, filters: &SearchFilters) -> AppResult<Vec<SearchResult>> {
    let regex = compile_query(&filters.query)?;
    let field = filters.field.as_deref().and_then(SearchField::parse);

    let candidates = fetch_candidates(pool, filters).await?;

    let mut results: Vec<SearchResult> = Vec::new();
    for (message, attachments) in candidates {
        if let Some(regex) = &regex {
            if let Some(result) = match_message(&message, &attachments, regex, field, filters.search_attachments)
            {
                results.push(result);
            }
        } else {
            results.push(SearchResult {
                message,
                attachments,
                matched_field: "metadata",
                preview: String::new(),
            });
        }
    }

    sort_results(&mut results, filters);

    let limit = filters.limit.clamp(0, HARD_LIMIT) as usize;
    let skip = filters.skip.max(0) as usize;
    Ok(results.into_iter().skip(skip).take(limit).collect())
}

/// Re-test the query against each field in priority order body → subject →
/// sender → attachment (or only the explicit `field`, if given), and build
/// the preview from the first match.
fn match_message(
    message: &Message,
    attachments: &[Attachment],
    regex: &Regex,
    field: Option<SearchField>,
    search_attachments: bool,
) -> Option<SearchResult> {
    let candidates: Vec<(SearchField, &str)> = match field {
        Some(SearchField::Sender) => vec![(SearchField::Sender, message.sender.as_deref().unwrap_or(""))],
        Some(SearchField::Subject) => vec![(SearchField::Subject, message.subject.as_deref().unwrap_or(""))],
        Some(SearchField::Body) => vec![(SearchField::Body, message.body_plain.as_deref().unwrap_or(""))],
        Some(SearchField::Attachment) => attachments
            .iter()
            .filter_map(|a| a.text_content.as_deref())
            .map(|t| (SearchField::Attachment, t))
            .collect(),
        None => {
            let mut candidates = vec![
                (SearchField::Body, message.body_plain.as_deref().unwrap_or("")),
                (SearchField::Subject, message.subject.as_deref().unwrap_or("")),
                (SearchField::Sender, message.sender.as_deref().unwrap_or("")),
            ];
            if search_attachments {
                candidates.extend(
                    attachments
                        .iter()
                        .filter_map(|a| a.text_content.as_deref())
                        .map(|t| (SearchField::Attachment, t)),
                );
            }
            candidates
        }
    };

    for (matched_field, text) in candidates {
        if let Some(m) = regex.find(text) {
            return Some(SearchResult {
                message: message.clone(),
                attachments: attachments.to_vec(),
                matched_field: field_label(matched_field),
                preview: build_preview(text, m.start(), m.end()),
            });
        }
    }
    None
}

fn field_label(field: SearchField) -> &'static str {
    match field {
        SearchField::Sender => "sender",
        SearchField::Subject => "subject",
        SearchField::Body => "body",
        SearchField::Attachment => "attachment",
    }
}

/// Up to 200 chars surrounding the match, with ellipses when truncated.
fn build_preview(text: &str, match_start: usize, match_end: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let byte_to_char = |byte_idx: usize| text[..byte_idx.min(text.len())].chars().count();
    let start_char = byte_to_char(match_start);
    let end_char = byte_to_char(match_end);

    let window_start = start_char.saturating_sub(PREVIEW_RADIUS);
    let window_end = (end_char + PREVIEW_RADIUS).min(chars.len());

    let mut preview: String = chars[window_start..window_end].iter().collect();
    if window_end < chars.len() {
        preview.push('…');
    }
    if window_start > 0 {
        preview = format!("…{preview}");
    }
    preview
}

fn sort_results(results: &mut [SearchResult], filters: &SearchFilters) {
    let sort_by = filters
        .sort_by
        .as_deref()
        .map(|s| match s {
            "processed_at" => SortBy::ProcessedAt,
            "sender" => SortBy::Sender,
            "subject" => SortBy::Subject,
            _ => SortBy::EmailDate,
        })
        .unwrap_or(SortBy::EmailDate);
    let sort_order = match filters.sort_order.as_deref() {
        Some("asc") => SortOrder::Asc,
        _ => SortOrder::Desc,
    };
    let descending = sort_order == SortOrder::Desc;

    results.sort_by(|a, b| {
        let ordering = match sort_by {
            SortBy::EmailDate => a.message.email_date.cmp(&b.message.email_date),
            SortBy::ProcessedAt => a.message.processed_at.cmp(&b.message.processed_at),
            SortBy::Sender => a.message.sender.cmp(&b.message.sender),
            SortBy::Subject => a.message.subject.cmp(&b.message.subject),
        };
        if descending { ordering.reverse() } else { ordering }
    });
}

async fn fetch_candidates(
    pool: &PgPool,
    filters: &SearchFilters,
) -> DbResult<Vec<(Message, Vec<Attachment>)>> {
    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("SELECT m.* FROM messages m");

    let needs_account_lookup = filters.from_me || filters.to_me;
    let me_username = if needs_account_lookup {
        match filters.account_id {
            Some(id) => Some(account_username(pool, id).await?),
            None => None,
        }
    } else {
        None
    };

    qb.push(" WHERE 1=1");
    if let Some(account_id) = filters.account_id {
        qb.push(" AND m.account_id = ").push_bind(account_id);
    }
    if let Some(from) = filters.date_from {
        qb.push(" AND m.email_date >= ").push_bind(from);
    }
    if let Some(to) = filters.date_to {
        qb.push(" AND m.email_date <= ").push_bind(to);
    }
    if let Some(has_attachments) = filters.has_attachments {
        if has_attachments {
            qb.push(" AND m.attachment_count > 0");
        } else {
            qb.push(" AND m.attachment_count = 0");
        }
    }
    if let Some(participant) = &filters.participant {
        qb.push(" AND (m.sender ILIKE ")
            .push_bind(format!("%{participant}%"))
            .push(" OR m.recipient ILIKE ")
            .push_bind(format!("%{participant}%"))
            .push(")");
    }
    if let Some(username) = &me_username {
        let mut clauses = Vec::new();
        if filters.from_me {
            clauses.push("m.sender ILIKE ");
        }
        if filters.to_me {
            clauses.push("m.recipient ILIKE ");
        }
        qb.push(" AND (");
        for (i, clause) in clauses.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(*clause).push_bind(format!("%{username}%"));
        }
        qb.push(")");
    }
    qb.push(" ORDER BY m.email_date DESC");

    let rows = qb.build().fetch_all(pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let message = Message::from_row(row)?;
        let attachments = db::list_attachments(pool, message.id).await?;
        out.push((message, attachments));
    }
    Ok(out)
}

async fn account_username(pool: &PgPool, account_id: i64) -> DbResult<String> {
    let account: Account = db::get_account(pool, account_id).await?;
    Ok(account.username)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            id: 1,
            account_id: 1,
            message_id: "<m1>".to_owned(),
            sender: Some("alice@example.com".to_owned()),
            recipient: Some("bob@example.com".to_owned()),
            subject: Some("Invoice #7".to_owned()),
            email_date: Utc::now(),
            body_plain: Some("please pay".to_owned()),
            body_html: None,
            processed_at: Utc::now(),
            attachment_count: 0,
        }
    }

    #[test]
    fn compile_query_rejects_oversized_pattern() {
        let pattern = "A".repeat(MAX_PATTERN_LENGTH + 1);
        assert!(compile_query(&pattern).is_err());
    }

    #[test]
    fn compile_query_rejects_invalid_regex() {
        assert!(compile_query("(").is_err());
    }

    #[test]
    fn compile_query_accepts_empty_as_bypass() {
        assert!(compile_query("").unwrap().is_none());
    }

    #[test]
    fn match_message_finds_subject_hit_with_field_unset() {
        let regex = RegexBuilder::new("invoice").case_insensitive(true).build().unwrap();
        let result = match_message(&sample_message(), &[], &regex, None, false).unwrap();
        assert_eq!(result.matched_field, "subject");
        assert!(result.preview.to_ascii_lowercase().contains("invoice"));
    }

    #[test]
    fn match_message_returns_none_when_no_field_matches() {
        let regex = RegexBuilder::new("nonexistent").build().unwrap();
        assert!(match_message(&sample_message(), &[], &regex, None, false).is_none());
    }

    #[test]
    fn preview_prefixes_and_suffixes_ellipsis_when_truncated() {
        let text = "x".repeat(500) + "target" + &"y".repeat(500);
        let preview = build_preview(&text, 500, 506);
        assert!(preview.starts_with('…'));
        assert!(preview.ends_with('…'));
        assert!(preview.contains("target"));
    }
}
