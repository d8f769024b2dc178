//! MCP tool mirror, mounted at `/llm/mcp`
//!
//! Each tool is a thin wrapper around the same `crate::ops` function its
//! `http.rs` sibling calls, following the teacher's `#[tool]` →
//! `finalize_tool` pattern: a handler builds a `(summary, data)` pair and
//! `finalize_tool` wraps it in a `ToolEnvelope` or converts the error to
//! `ErrorData`.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::error;

use crate::dto::{
    AccountDto, AccountIdInput, ConnectionTestResult, CreateAccountInput, ForwardEmailInput,
    GetEmailInput, ListEmailsPage, ListEmailsQuery, McpAttachmentInput, Meta, MessageDetailDto,
    ProcessResult, ReplyEmailInput, SearchQuery, SearchResultDto, SearchResultsPage,
    SendEmailInput, SendEmailWithAttachmentsMcpInput, SendResult, StatusDto, ToolEnvelope,
    UpdateAccountMcpInput,
};
use crate::errors::AppResult;
use crate::ops;
use crate::smtp::{ComposeInput, OutboundAttachment};
use crate::state::AppState;

/// MCP surface over the same account/email operations `http.rs` exposes.
#[derive(Clone)]
pub struct MailVaultMcp {
    state: Arc<AppState>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailVaultMcp {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(name = "list_smtp_configs", description = "List configured email accounts")]
    async fn list_smtp_configs(&self) -> Result<Json<ToolEnvelope<Vec<AccountDto>>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "list_smtp_configs",
            ops::list_accounts(&self.state).await.map(|accounts| {
                let dtos: Vec<AccountDto> = accounts.iter().map(AccountDto::from).collect();
                (format!("{} account(s) configured", dtos.len()), dtos)
            }),
        )
    }

    #[tool(name = "create_smtp_config", description = "Create a new email account")]
    async fn create_smtp_config(
        &self,
        Parameters(input): Parameters<CreateAccountInput>,
    ) -> Result<Json<ToolEnvelope<AccountDto>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "create_smtp_config",
            ops::create_account(&self.state, input.into()).await.map(|account| {
                let dto = AccountDto::from(&account);
                (format!("account '{}' created", dto.name), dto)
            }),
        )
    }

    #[tool(name = "get_smtp_config", description = "Fetch one email account by id")]
    async fn get_smtp_config(
        &self,
        Parameters(input): Parameters<AccountIdInput>,
    ) -> Result<Json<ToolEnvelope<AccountDto>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "get_smtp_config",
            ops::get_account(&self.state, input.account_id)
                .await
                .map(|account| {
                    let dto = AccountDto::from(&account);
                    (format!("account '{}'", dto.name), dto)
                }),
        )
    }

    #[tool(name = "update_smtp_config", description = "Update an email account")]
    async fn update_smtp_config(
        &self,
        Parameters(input): Parameters<UpdateAccountMcpInput>,
    ) -> Result<Json<ToolEnvelope<AccountDto>>, ErrorData> {
        let started = Instant::now();
        let (account_id, update) = input.split();
        finalize_tool(
            started,
            "update_smtp_config",
            ops::update_account(&self.state, account_id, update.into())
                .await
                .map(|account| {
                    let dto = AccountDto::from(&account);
                    (format!("account '{}' updated", dto.name), dto)
                }),
        )
    }

    #[tool(name = "delete_smtp_config", description = "Delete an email account")]
    async fn delete_smtp_config(
        &self,
        Parameters(input): Parameters<AccountIdInput>,
    ) -> Result<Json<ToolEnvelope<serde_json::Value>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "delete_smtp_config",
            ops::delete_account(&self.state, input.account_id)
                .await
                .map(|()| ("account deleted".to_owned(), serde_json::json!({}))),
        )
    }

    #[tool(
        name = "test_connection",
        description = "Verify IMAP connectivity for an account"
    )]
    async fn test_connection(
        &self,
        Parameters(input): Parameters<AccountIdInput>,
    ) -> Result<Json<ToolEnvelope<ConnectionTestResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "test_connection",
            ops::test_connection(&self.state, input.account_id)
                .await
                .map(|result| {
                    let summary = if result.imap_ok {
                        "connection succeeded".to_owned()
                    } else {
                        format!("connection failed: {}", result.imap_detail)
                    };
                    (
                        summary,
                        ConnectionTestResult {
                            imap_ok: result.imap_ok,
                            imap_detail: result.imap_detail,
                            smtp_configured: result.smtp_configured,
                        },
                    )
                }),
        )
    }

    #[tool(
        name = "process_account",
        description = "Poll one account's mailboxes now, outside its normal schedule"
    )]
    async fn process_account(
        &self,
        Parameters(input): Parameters<AccountIdInput>,
    ) -> Result<Json<ToolEnvelope<ProcessResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "process_account",
            ops::process_account(&self.state, input.account_id)
                .await
                .map(|summary| {
                    (
                        format!(
                            "{} new message(s) of {} seen across {} folder(s)",
                            summary.messages_inserted, summary.messages_seen, summary.folders_polled
                        ),
                        ProcessResult {
                            account_id: summary.account_id,
                            messages_seen: summary.messages_seen,
                            messages_inserted: summary.messages_inserted,
                            folders_polled: summary.folders_polled,
                        },
                    )
                }),
        )
    }

    #[tool(name = "list_emails", description = "List stored emails, newest first")]
    async fn list_emails(
        &self,
        Parameters(query): Parameters<ListEmailsQuery>,
    ) -> Result<Json<ToolEnvelope<ListEmailsPage>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "list_emails",
            ops::list_emails(&self.state, query.skip, query.limit)
                .await
                .map(|(messages, total)| {
                    let page = ListEmailsPage {
                        total,
                        skip: query.skip,
                        limit: query.limit.clamp(0, 100),
                        emails: messages.iter().map(Into::into).collect(),
                    };
                    (format!("{} of {} email(s)", page.emails.len(), total), page)
                }),
        )
    }

    #[tool(name = "get_email", description = "Fetch one stored email by id")]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<Json<ToolEnvelope<MessageDetailDto>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "get_email",
            ops::get_email(&self.state, input.message_id)
                .await
                .map(|(message, attachments)| {
                    let detail = MessageDetailDto::build(&message, &attachments, input.include_content);
                    (
                        detail
                            .summary
                            .subject
                            .clone()
                            .unwrap_or_else(|| "(no subject)".to_owned()),
                        detail,
                    )
                }),
        )
    }

    #[tool(
        name = "search_emails",
        description = "Regex search across sender, subject, body, and (optionally) attachment text"
    )]
    async fn search_emails(
        &self,
        Parameters(query): Parameters<SearchQuery>,
    ) -> Result<Json<ToolEnvelope<SearchResultsPage>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "search_emails",
            ops::search_emails(&self.state, query.into()).await.map(|results| {
                let page = SearchResultsPage {
                    results: results.iter().map(SearchResultDto::from).collect(),
                };
                (format!("{} match(es)", page.results.len()), page)
            }),
        )
    }

    #[tool(name = "send_email", description = "Send an email from a configured account")]
    async fn send_email(
        &self,
        Parameters(input): Parameters<SendEmailInput>,
    ) -> Result<Json<ToolEnvelope<SendResult>>, ErrorData> {
        let started = Instant::now();
        let to = input.to.clone();
        let compose = ComposeInput {
            to: input.to,
            cc: input.cc,
            bcc: input.bcc,
            subject: input.subject,
            body_plain: input.body_plain,
            body_html: input.body_html,
            ..Default::default()
        };
        finalize_tool(
            started,
            "send_email",
            ops::send_email(&self.state, input.account_id, compose)
                .await
                .map(|()| (format!("email sent to {}", to.join(", ")), SendResult { sent: true })),
        )
    }

    #[tool(
        name = "send_email_with_attachments",
        description = "Send an email with base64-encoded attachments"
    )]
    async fn send_email_with_attachments(
        &self,
        Parameters(input): Parameters<SendEmailWithAttachmentsMcpInput>,
    ) -> Result<Json<ToolEnvelope<SendResult>>, ErrorData> {
        let started = Instant::now();
        let result = decode_attachments(input.attachments).and_then(|attachments| {
            Ok((
                ComposeInput {
                    to: input.to,
                    cc: input.cc,
                    bcc: input.bcc,
                    subject: input.subject,
                    body_plain: input.body_plain,
                    body_html: input.body_html,
                    ..Default::default()
                },
                attachments,
            ))
        });
        let outcome = match result {
            Ok((compose, attachments)) => {
                let count = attachments.len();
                ops::send_email_with_attachments(&self.state, input.account_id, compose, attachments)
                    .await
                    .map(|()| (format!("email sent with {count} attachment(s)"), SendResult { sent: true }))
            }
            Err(e) => Err(e),
        };
        finalize_tool(started, "send_email_with_attachments", outcome)
    }

    #[tool(name = "reply_email", description = "Reply to a stored email")]
    async fn reply_email(
        &self,
        Parameters(input): Parameters<ReplyEmailInput>,
    ) -> Result<Json<ToolEnvelope<SendResult>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "reply_email",
            ops::reply_email(
                &self.state,
                input.message_id,
                input.account_id,
                input.body_plain,
                input.body_html,
                input.quote_original,
            )
            .await
            .map(|()| ("reply sent".to_owned(), SendResult { sent: true })),
        )
    }

    #[tool(name = "forward_email", description = "Forward a stored email")]
    async fn forward_email(
        &self,
        Parameters(input): Parameters<ForwardEmailInput>,
    ) -> Result<Json<ToolEnvelope<SendResult>>, ErrorData> {
        let started = Instant::now();
        let to = input.to.clone();
        finalize_tool(
            started,
            "forward_email",
            ops::forward_email(
                &self.state,
                input.message_id,
                input.account_id,
                input.to,
                input.body_plain,
                input.include_attachment_text,
            )
            .await
            .map(|()| (format!("forwarded to {}", to.join(", ")), SendResult { sent: true })),
        )
    }

    #[tool(
        name = "status",
        description = "Report account and message counts, and whether the scheduler is running"
    )]
    async fn status(&self) -> Result<Json<ToolEnvelope<StatusDto>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            started,
            "status",
            ops::status(&self.state).await.map(|s| {
                let dto = StatusDto {
                    accounts_total: s.accounts_total,
                    accounts_enabled: s.accounts_enabled,
                    messages_total: s.messages_total,
                    scheduler_running: s.scheduler_running,
                };
                (
                    format!(
                        "{} account(s) ({} enabled), {} message(s) stored",
                        dto.accounts_total, dto.accounts_enabled, dto.messages_total
                    ),
                    dto,
                )
            }),
        )
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailVaultMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Multi-account email ingestion and search. Mirrors the /api/v1 REST surface \
                 one tool per route."
                    .to_owned(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

fn decode_attachments(inputs: Vec<McpAttachmentInput>) -> AppResult<Vec<OutboundAttachment>> {
    inputs
        .into_iter()
        .map(|a| {
            let data = base64::engine::general_purpose::STANDARD
                .decode(a.data_base64)
                .map_err(|e| crate::errors::AppError::invalid(format!("invalid base64 attachment data: {e}")))?;
            Ok(OutboundAttachment {
                filename: a.filename,
                content_type: a.content_type,
                data,
            })
        })
        .collect()
}

fn finalize_tool<T>(
    started: Instant,
    tool: &str,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    match result {
        Ok((summary, data)) => Ok(Json(ToolEnvelope {
            summary,
            data,
            meta: Meta::now(duration_ms(started)),
        })),
        Err(e) => {
            error!(tool, error = %e, "mcp tool error");
            Err(e.to_error_data())
        }
    }
}

fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_attachments_decodes_valid_base64() {
        let inputs = vec![McpAttachmentInput {
            filename: "notes.txt".to_owned(),
            content_type: "text/plain".to_owned(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(b"hello"),
        }];
        let decoded = decode_attachments(inputs).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].data, b"hello");
        assert_eq!(decoded[0].filename, "notes.txt");
    }

    #[test]
    fn decode_attachments_rejects_malformed_base64() {
        let inputs = vec![McpAttachmentInput {
            filename: "bad.bin".to_owned(),
            content_type: "application/octet-stream".to_owned(),
            data_base64: "not valid base64 !!!".to_owned(),
        }];
        assert!(decode_attachments(inputs).is_err());
    }
}
