//! Wire-format DTOs for the HTTP and MCP surfaces
//!
//! Request/response shapes never reuse `db::*` row structs directly — in
//! particular `db::Account.password` never reaches the wire. Every input
//! type derives `JsonSchema` so the MCP tool mirror (`crate::mcp`) can expose
//! the identical shape as a tool parameter schema.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::db::{Account, Attachment, Message};
use crate::search::SearchResult;

/// Metadata attached to every MCP tool response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    pub now_utc: String,
    pub duration_ms: u64,
}

impl Meta {
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for MCP tools, mirroring each REST operation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    pub summary: String,
    pub data: T,
    pub meta: Meta,
}

/// Account metadata (credential never included).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AccountDto {
    pub id: i64,
    pub name: String,
    pub account_address: Option<String>,
    pub imap_host: String,
    pub imap_port: i32,
    pub imap_use_ssl: bool,
    pub imap_use_tls: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    pub smtp_use_ssl: bool,
    pub smtp_use_tls: bool,
    pub username: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_emails_processed: i64,
    pub store_text_only_override: Option<bool>,
    pub max_attachment_size_override: Option<i64>,
    pub extract_pdf_override: Option<bool>,
    pub extract_word_override: Option<bool>,
    pub extract_image_override: Option<bool>,
    pub extract_other_override: Option<bool>,
}

impl From<&Account> for AccountDto {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            name: a.name.clone(),
            account_address: a.account_address.clone(),
            imap_host: a.imap_host.clone(),
            imap_port: a.imap_port,
            imap_use_ssl: a.imap_use_ssl,
            imap_use_tls: a.imap_use_tls,
            smtp_host: a.smtp_host.clone(),
            smtp_port: a.smtp_port,
            smtp_use_ssl: a.smtp_use_ssl,
            smtp_use_tls: a.smtp_use_tls,
            username: a.username.clone(),
            enabled: a.enabled,
            created_at: a.created_at,
            updated_at: a.updated_at,
            last_check: a.last_check,
            last_error: a.last_error.clone(),
            total_emails_processed: a.total_emails_processed,
            store_text_only_override: a.store_text_only_override,
            max_attachment_size_override: a.max_attachment_size_override,
            extract_pdf_override: a.extract_pdf_override,
            extract_word_override: a.extract_word_override,
            extract_image_override: a.extract_image_override,
            extract_other_override: a.extract_other_override,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Body for `POST /smtp-configs`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateAccountInput {
    pub name: String,
    pub account_address: Option<String>,
    pub imap_host: String,
    pub imap_port: i32,
    #[serde(default = "default_true")]
    pub imap_use_ssl: bool,
    #[serde(default = "default_true")]
    pub imap_use_tls: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<i32>,
    #[serde(default)]
    pub smtp_use_ssl: bool,
    #[serde(default = "default_true")]
    pub smtp_use_tls: bool,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub store_text_only_override: Option<bool>,
    #[serde(default)]
    pub max_attachment_size_override: Option<i64>,
    #[serde(default)]
    pub extract_pdf_override: Option<bool>,
    #[serde(default)]
    pub extract_word_override: Option<bool>,
    #[serde(default)]
    pub extract_image_override: Option<bool>,
    #[serde(default)]
    pub extract_other_override: Option<bool>,
}

impl From<CreateAccountInput> for crate::db::NewAccount {
    fn from(input: CreateAccountInput) -> Self {
        Self {
            name: input.name,
            account_address: input.account_address,
            imap_host: input.imap_host,
            imap_port: input.imap_port,
            imap_use_ssl: input.imap_use_ssl,
            imap_use_tls: input.imap_use_tls,
            smtp_host: input.smtp_host,
            smtp_port: input.smtp_port,
            smtp_use_ssl: input.smtp_use_ssl,
            smtp_use_tls: input.smtp_use_tls,
            username: input.username,
            password: SecretString::from(input.password),
            store_text_only_override: input.store_text_only_override,
            max_attachment_size_override: input.max_attachment_size_override,
            extract_pdf_override: input.extract_pdf_override,
            extract_word_override: input.extract_word_override,
            extract_image_override: input.extract_image_override,
            extract_other_override: input.extract_other_override,
        }
    }
}

/// Body for `PUT /smtp-configs/{id}` — every field is "leave unchanged
/// unless present", using the usual `Option<Option<T>>` double-option
/// trick for nullable columns (outer `None` = don't touch, `Some(None)` =
/// clear the column).
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct UpdateAccountInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account_address: Option<Option<String>>,
    #[serde(default)]
    pub imap_host: Option<String>,
    #[serde(default)]
    pub imap_port: Option<i32>,
    #[serde(default)]
    pub imap_use_ssl: Option<bool>,
    #[serde(default)]
    pub imap_use_tls: Option<bool>,
    #[serde(default)]
    pub smtp_host: Option<Option<String>>,
    #[serde(default)]
    pub smtp_port: Option<Option<i32>>,
    #[serde(default)]
    pub smtp_use_ssl: Option<bool>,
    #[serde(default)]
    pub smtp_use_tls: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub store_text_only_override: Option<Option<bool>>,
    #[serde(default)]
    pub max_attachment_size_override: Option<Option<i64>>,
    #[serde(default)]
    pub extract_pdf_override: Option<Option<bool>>,
    #[serde(default)]
    pub extract_word_override: Option<Option<bool>>,
    #[serde(default)]
    pub extract_image_override: Option<Option<bool>>,
    #[serde(default)]
    pub extract_other_override: Option<Option<bool>>,
}

impl From<UpdateAccountInput> for crate::db::AccountUpdate {
    fn from(input: UpdateAccountInput) -> Self {
        Self {
            name: input.name,
            account_address: input.account_address,
            imap_host: input.imap_host,
            imap_port: input.imap_port,
            imap_use_ssl: input.imap_use_ssl,
            imap_use_tls: input.imap_use_tls,
            smtp_host: input.smtp_host,
            smtp_port: input.smtp_port,
            smtp_use_ssl: input.smtp_use_ssl,
            smtp_use_tls: input.smtp_use_tls,
            username: input.username,
            password: input.password.map(SecretString::from),
            enabled: input.enabled,
            store_text_only_override: input.store_text_only_override,
            max_attachment_size_override: input.max_attachment_size_override,
            extract_pdf_override: input.extract_pdf_override,
            extract_word_override: input.extract_word_override,
            extract_image_override: input.extract_image_override,
            extract_other_override: input.extract_other_override,
        }
    }
}

/// Result of `GET /smtp-configs/{id}/test-connection`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionTestResult {
    pub imap_ok: bool,
    pub imap_detail: String,
    pub smtp_configured: bool,
}

/// Result of `POST /smtp-configs/{id}/process`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessResult {
    pub account_id: i64,
    pub messages_seen: u64,
    pub messages_inserted: u64,
    pub folders_polled: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentDto {
    pub id: i64,
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub size: i64,
    pub text_content: Option<String>,
}

impl From<&Attachment> for AttachmentDto {
    fn from(a: &Attachment) -> Self {
        Self {
            id: a.id,
            filename: a.filename.clone(),
            content_type: a.content_type.clone(),
            content_id: a.content_id.clone(),
            size: a.size,
            text_content: a.text_content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageSummaryDto {
    pub id: i64,
    pub account_id: i64,
    pub message_id: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub email_date: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub attachment_count: i32,
}

impl From<&Message> for MessageSummaryDto {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            account_id: m.account_id,
            message_id: m.message_id.clone(),
            sender: m.sender.clone(),
            recipient: m.recipient.clone(),
            subject: m.subject.clone(),
            email_date: m.email_date,
            processed_at: m.processed_at,
            attachment_count: m.attachment_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MessageDetailDto {
    #[serde(flatten)]
    pub summary: MessageSummaryDto,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentDto>,
}

impl MessageDetailDto {
    /// `include_content=false` omits bodies and attachment text, returning
    /// metadata only (still a 200, not a distinct shape).
    pub fn build(message: &Message, attachments: &[Attachment], include_content: bool) -> Self {
        Self {
            summary: MessageSummaryDto::from(message),
            body_plain: include_content.then(|| message.body_plain.clone()).flatten(),
            body_html: include_content
                .then(|| message.body_html.as_deref().map(ammonia::clean))
                .flatten(),
            attachments: if include_content {
                attachments.iter().map(AttachmentDto::from).collect()
            } else {
                Vec::new()
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListEmailsPage {
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
    pub emails: Vec<MessageSummaryDto>,
}

/// Query params for `GET /emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListEmailsQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

fn default_list_limit() -> i64 {
    50
}

/// Query params for `GET /emails/{id}`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailQuery {
    #[serde(default = "default_true")]
    pub include_content: bool,
}

/// Query params for `GET /emails/search` (§4.8).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub smtp_config_id: Option<i64>,
    #[serde(default)]
    pub has_attachments: Option<bool>,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub to_me: bool,
    #[serde(default)]
    pub search_attachments: bool,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_list_limit")]
    pub limit: i64,
}

impl From<SearchQuery> for crate::search::SearchFilters {
    fn from(q: SearchQuery) -> Self {
        Self {
            query: q.query,
            field: q.field,
            date_from: q.date_from,
            date_to: q.date_to,
            account_id: q.smtp_config_id,
            has_attachments: q.has_attachments,
            participant: q.participant,
            from_me: q.from_me,
            to_me: q.to_me,
            search_attachments: q.search_attachments,
            sort_by: q.sort_by,
            sort_order: q.sort_order,
            skip: q.skip,
            limit: q.limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResultDto {
    #[serde(flatten)]
    pub summary: MessageSummaryDto,
    pub body_plain: Option<String>,
    pub attachments: Vec<AttachmentDto>,
    pub matched_field: String,
    pub preview: String,
}

impl From<&SearchResult> for SearchResultDto {
    fn from(r: &SearchResult) -> Self {
        Self {
            summary: MessageSummaryDto::from(&r.message),
            body_plain: r.message.body_plain.clone(),
            attachments: r.attachments.iter().map(AttachmentDto::from).collect(),
            matched_field: r.matched_field.to_owned(),
            preview: r.preview.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchResultsPage {
    pub results: Vec<SearchResultDto>,
}

/// Body for `POST /send-email`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailInput {
    pub account_id: i64,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
}

/// JSON sidecar for `POST /send-email-with-attachments`, carried as one
/// multipart field (`payload`) alongside file parts.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailWithAttachmentsPayload {
    pub account_id: i64,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
}

/// Body for `POST /emails/{id}/reply`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplyInput {
    pub account_id: i64,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default = "default_true")]
    pub quote_original: bool,
}

/// Body for `POST /emails/{id}/forward`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ForwardInput {
    pub account_id: i64,
    pub to: Vec<String>,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default = "default_true")]
    pub include_attachment_text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendResult {
    pub sent: bool,
}

/// Result of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StatusDto {
    pub accounts_total: i64,
    pub accounts_enabled: i64,
    pub messages_total: i64,
    pub scheduler_running: bool,
}

/// Input carrying only an account id, used by several MCP tool mirrors.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AccountIdInput {
    pub account_id: i64,
}

/// Body for the `update_smtp_config` MCP tool — `UpdateAccountInput`'s fields
/// plus the account id the HTTP surface instead takes from the path.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UpdateAccountMcpInput {
    pub account_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account_address: Option<Option<String>>,
    #[serde(default)]
    pub imap_host: Option<String>,
    #[serde(default)]
    pub imap_port: Option<i32>,
    #[serde(default)]
    pub imap_use_ssl: Option<bool>,
    #[serde(default)]
    pub imap_use_tls: Option<bool>,
    #[serde(default)]
    pub smtp_host: Option<Option<String>>,
    #[serde(default)]
    pub smtp_port: Option<Option<i32>>,
    #[serde(default)]
    pub smtp_use_ssl: Option<bool>,
    #[serde(default)]
    pub smtp_use_tls: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub store_text_only_override: Option<Option<bool>>,
    #[serde(default)]
    pub max_attachment_size_override: Option<Option<i64>>,
    #[serde(default)]
    pub extract_pdf_override: Option<Option<bool>>,
    #[serde(default)]
    pub extract_word_override: Option<Option<bool>>,
    #[serde(default)]
    pub extract_image_override: Option<Option<bool>>,
    #[serde(default)]
    pub extract_other_override: Option<Option<bool>>,
}

impl UpdateAccountMcpInput {
    /// Split into the account id and the same `UpdateAccountInput` the HTTP
    /// handler builds from the path id plus the JSON body.
    pub fn split(self) -> (i64, UpdateAccountInput) {
        let update = UpdateAccountInput {
            name: self.name,
            account_address: self.account_address,
            imap_host: self.imap_host,
            imap_port: self.imap_port,
            imap_use_ssl: self.imap_use_ssl,
            imap_use_tls: self.imap_use_tls,
            smtp_host: self.smtp_host,
            smtp_port: self.smtp_port,
            smtp_use_ssl: self.smtp_use_ssl,
            smtp_use_tls: self.smtp_use_tls,
            username: self.username,
            password: self.password,
            enabled: self.enabled,
            store_text_only_override: self.store_text_only_override,
            max_attachment_size_override: self.max_attachment_size_override,
            extract_pdf_override: self.extract_pdf_override,
            extract_word_override: self.extract_word_override,
            extract_image_override: self.extract_image_override,
            extract_other_override: self.extract_other_override,
        };
        (self.account_id, update)
    }
}

/// Body for the `get_email` MCP tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    pub message_id: i64,
    #[serde(default = "default_true")]
    pub include_content: bool,
}

/// Body for the `reply_email` MCP tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReplyEmailInput {
    pub message_id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default = "default_true")]
    pub quote_original: bool,
}

/// Body for the `forward_email` MCP tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ForwardEmailInput {
    pub message_id: i64,
    pub account_id: i64,
    pub to: Vec<String>,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default = "default_true")]
    pub include_attachment_text: bool,
}

/// One base64-encoded attachment carried in an MCP tool call (the `/llm/mcp`
/// transport has no multipart body, unlike `POST /send-email-with-attachments`).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct McpAttachmentInput {
    pub filename: String,
    #[serde(default = "default_octet_stream")]
    pub content_type: String,
    pub data_base64: String,
}

fn default_octet_stream() -> String {
    "application/octet-stream".to_owned()
}

/// Body for the `send_email_with_attachments` MCP tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendEmailWithAttachmentsMcpInput {
    pub account_id: i64,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub body_plain: Option<String>,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<McpAttachmentInput>,
}
