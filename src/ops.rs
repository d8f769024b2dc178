//! Business operations shared by the HTTP and MCP surfaces
//!
//! Each HTTP handler and each MCP tool calls one of these functions so the
//! two transports never drift in behavior — the teacher's `server.rs`
//! pattern of a thin `#[tool]` wrapper delegating to a private `_impl`
//! method, generalized so the wrapper can be either an axum handler or a
//! tool method.

use crate::db::{self, Account, Attachment, Message};
use crate::errors::{AppError, AppResult};
use crate::imapclient::{self, ImapAccount};
use crate::scheduler::PollSummary;
use crate::search::{self, SearchFilters, SearchResult};
use crate::smtp::{self, ComposeInput, OutboundAttachment};
use crate::state::AppState;

pub async fn list_accounts(state: &AppState) -> AppResult<Vec<Account>> {
    Ok(db::list_accounts(&state.pool).await?)
}

pub async fn create_account(state: &AppState, new: db::NewAccount) -> AppResult<Account> {
    if new.name.trim().is_empty() {
        return Err(AppError::invalid("account name must not be empty"));
    }
    Ok(db::create_account(&state.pool, &new).await?)
}

pub async fn get_account(state: &AppState, id: i64) -> AppResult<Account> {
    Ok(db::get_account(&state.pool, id).await?)
}

pub async fn update_account(
    state: &AppState,
    id: i64,
    update: db::AccountUpdate,
) -> AppResult<Account> {
    Ok(db::update_account(&state.pool, id, &update).await?)
}

pub async fn delete_account(state: &AppState, id: i64) -> AppResult<()> {
    Ok(db::delete_account(&state.pool, id).await?)
}

pub struct ConnectionTest {
    pub imap_ok: bool,
    pub imap_detail: String,
    pub smtp_configured: bool,
}

/// `GET /smtp-configs/{id}/test-connection`: connect, authenticate, query
/// capabilities, then best-effort logout. Never mutates the mailbox.
pub async fn test_connection(state: &AppState, id: i64) -> AppResult<ConnectionTest> {
    let account = db::get_account(&state.pool, id).await?;
    let imap_account = ImapAccount {
        host: account.imap_host.clone(),
        port: account.imap_port as u16,
        use_ssl: account.imap_use_ssl,
        use_tls: account.imap_use_tls,
        username: account.username.clone(),
        password: account.password.clone(),
    };

    let (imap_ok, imap_detail) = match imapclient::connect_authenticated(&imap_account).await {
        Ok(mut session) => {
            let detail = match imapclient::capabilities(&mut session).await {
                Ok(caps) => format!("connected, {} capabilities advertised", caps.iter().count()),
                Err(e) => format!("connected, capability check failed: {e}"),
            };
            imapclient::logout(&mut session).await;
            (true, detail)
        }
        Err(e) => (false, e.to_string()),
    };

    Ok(ConnectionTest {
        imap_ok,
        imap_detail,
        smtp_configured: account.smtp_host.is_some(),
    })
}

/// `POST /smtp-configs/{id}/process`: manual single-account poll, reusing
/// the scheduler's poller routine verbatim.
pub async fn process_account(state: &AppState, id: i64) -> AppResult<PollSummary> {
    state.scheduler.poll_account_now(id).await
}

pub async fn list_emails(
    state: &AppState,
    skip: i64,
    limit: i64,
) -> AppResult<(Vec<Message>, i64)> {
    let limit = limit.clamp(0, 100);
    Ok(db::list_messages_page(&state.pool, skip.max(0), limit).await?)
}

pub async fn get_email(state: &AppState, id: i64) -> AppResult<(Message, Vec<Attachment>)> {
    let message = db::get_message(&state.pool, id).await?;
    let attachments = db::list_attachments(&state.pool, id).await?;
    Ok((message, attachments))
}

pub async fn search_emails(state: &AppState, filters: SearchFilters) -> AppResult<Vec<SearchResult>> {
    search::search(&state.pool, &filters).await
}

pub async fn send_email(state: &AppState, account_id: i64, input: ComposeInput) -> AppResult<()> {
    let account = db::get_account(&state.pool, account_id).await?;
    smtp::send(&account, &input).await?;
    Ok(())
}

pub async fn send_email_with_attachments(
    state: &AppState,
    account_id: i64,
    mut input: ComposeInput,
    attachments: Vec<OutboundAttachment>,
) -> AppResult<()> {
    input.attachments = attachments;
    send_email(state, account_id, input).await
}

pub async fn reply_email(
    state: &AppState,
    message_id: i64,
    account_id: i64,
    body_plain: Option<String>,
    body_html: Option<String>,
    quote_original: bool,
) -> AppResult<()> {
    let original = db::get_message(&state.pool, message_id).await?;
    let account = db::get_account(&state.pool, account_id).await?;
    let input = smtp::build_reply(&original, body_plain, body_html, quote_original);
    smtp::send(&account, &input).await?;
    Ok(())
}

pub async fn forward_email(
    state: &AppState,
    message_id: i64,
    account_id: i64,
    to: Vec<String>,
    body_plain: Option<String>,
    include_attachment_text: bool,
) -> AppResult<()> {
    let original = db::get_message(&state.pool, message_id).await?;
    let account = db::get_account(&state.pool, account_id).await?;
    let original_attachments = if include_attachment_text {
        db::list_attachments(&state.pool, message_id).await?
    } else {
        Vec::new()
    };
    let input = smtp::build_forward(&original, &original_attachments, to, body_plain);
    smtp::send(&account, &input).await?;
    Ok(())
}

pub struct Status {
    pub accounts_total: i64,
    pub accounts_enabled: i64,
    pub messages_total: i64,
    pub scheduler_running: bool,
}

pub async fn status(state: &AppState) -> AppResult<Status> {
    let (accounts_total, accounts_enabled) = db::count_accounts(&state.pool).await?;
    let messages_total = db::count_messages(&state.pool).await?;
    Ok(Status {
        accounts_total,
        accounts_enabled,
        messages_total,
        scheduler_running: state.scheduler.is_running(),
    })
}
