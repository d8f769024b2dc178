//! HTTP surface: `/api/v1` REST routes (spec.md §6)
//!
//! Thin axum handlers: extract/validate the wire shape, call one of
//! `crate::ops`'s functions, map the result to a DTO or to `AppError`'s
//! `IntoResponse` impl. Every handler's business logic lives in `ops` so the
//! `/llm/mcp` mirror in `crate::mcp` can call the exact same functions.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::db::DbError;
use crate::dto::{
    AccountDto, ConnectionTestResult, CreateAccountInput, ForwardInput,
    GetEmailQuery, ListEmailsPage, ListEmailsQuery, MessageDetailDto, ProcessResult, ReplyInput,
    SearchQuery, SearchResultDto, SearchResultsPage, SendEmailInput,
    SendEmailWithAttachmentsPayload, SendResult, StatusDto, UpdateAccountInput,
};
use crate::errors::{AppError, AppResult};
use crate::ops;
use crate::smtp::{ComposeInput, OutboundAttachment};
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/smtp-configs", get(list_accounts).post(create_account))
        .route(
            "/smtp-configs/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/smtp-configs/{id}/test-connection", get(test_connection))
        .route("/smtp-configs/{id}/process", post(process_account))
        .route("/emails", get(list_emails))
        .route("/emails/search", get(search_emails))
        .route("/emails/{id}", get(get_email))
        .route("/send-email", post(send_email))
        .route(
            "/send-email-with-attachments",
            post(send_email_with_attachments),
        )
        .route("/emails/{id}/reply", post(reply_email))
        .route("/emails/{id}/forward", post(forward_email))
        .route("/status", get(status))
        .with_state(state)
}

/// Account create conflicts are surfaced as 422 (spec.md §6), distinct from
/// the 409 used for delete-blocked-by-dependents.
fn conflict_as_unprocessable(err: AppError) -> Response {
    if let AppError::Storage(DbError::Conflict(msg)) = &err {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": msg, "code": "duplicate_name" })),
        )
            .into_response();
    }
    err.into_response()
}

async fn list_accounts(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<AccountDto>>> {
    let accounts = ops::list_accounts(&state).await?;
    Ok(Json(accounts.iter().map(AccountDto::from).collect()))
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateAccountInput>,
) -> Response {
    match ops::create_account(&state, input.into()).await {
        Ok(account) => (StatusCode::CREATED, Json(AccountDto::from(&account))).into_response(),
        Err(e) => conflict_as_unprocessable(e),
    }
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<AccountDto>> {
    let account = ops::get_account(&state, id).await?;
    Ok(Json(AccountDto::from(&account)))
}

async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<UpdateAccountInput>,
) -> Response {
    match ops::update_account(&state, id, input.into()).await {
        Ok(account) => Json(AccountDto::from(&account)).into_response(),
        Err(e) => conflict_as_unprocessable(e),
    }
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    ops::delete_account(&state, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ConnectionTestResult>> {
    let result = ops::test_connection(&state, id).await?;
    Ok(Json(ConnectionTestResult {
        imap_ok: result.imap_ok,
        imap_detail: result.imap_detail,
        smtp_configured: result.smtp_configured,
    }))
}

async fn process_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ProcessResult>> {
    let summary = ops::process_account(&state, id).await?;
    Ok(Json(ProcessResult {
        account_id: summary.account_id,
        messages_seen: summary.messages_seen,
        messages_inserted: summary.messages_inserted,
        folders_polled: summary.folders_polled,
    }))
}

async fn list_emails(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListEmailsQuery>,
) -> AppResult<Json<ListEmailsPage>> {
    let (messages, total) = ops::list_emails(&state, query.skip, query.limit).await?;
    Ok(Json(ListEmailsPage {
        total,
        skip: query.skip,
        limit: query.limit.clamp(0, 100),
        emails: messages.iter().map(Into::into).collect(),
    }))
}

async fn get_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<GetEmailQuery>,
) -> AppResult<Json<MessageDetailDto>> {
    let (message, attachments) = ops::get_email(&state, id).await?;
    Ok(Json(MessageDetailDto::build(
        &message,
        &attachments,
        query.include_content,
    )))
}

async fn search_emails(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<SearchResultsPage>> {
    let results = ops::search_emails(&state, query.into()).await?;
    Ok(Json(SearchResultsPage {
        results: results.iter().map(SearchResultDto::from).collect(),
    }))
}

async fn send_email(
    State(state): State<Arc<AppState>>,
    Json(input): Json<SendEmailInput>,
) -> AppResult<Json<SendResult>> {
    let compose = ComposeInput {
        to: input.to,
        cc: input.cc,
        bcc: input.bcc,
        subject: input.subject,
        body_plain: input.body_plain,
        body_html: input.body_html,
        ..Default::default()
    };
    ops::send_email(&state, input.account_id, compose).await?;
    Ok(Json(SendResult { sent: true }))
}

/// `POST /send-email-with-attachments`: a `payload` field carrying the JSON
/// sidecar, followed by zero or more file parts. Every non-`payload` field
/// is taken as an attachment, named after its multipart filename (falling
/// back to the field name).
async fn send_email_with_attachments(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<SendResult>> {
    let mut payload: Option<SendEmailWithAttachmentsPayload> = None;
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::invalid(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        if name == "payload" {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::invalid(format!("malformed payload field: {e}")))?;
            payload = Some(
                serde_json::from_str(&text)
                    .map_err(|e| AppError::invalid(format!("invalid payload JSON: {e}")))?,
            );
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_owned)
            .unwrap_or_else(|| name.clone());
        let content_type = field
            .content_type()
            .map(str::to_owned)
            .unwrap_or_else(|| "application/octet-stream".to_owned());
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::invalid(format!("malformed attachment field: {e}")))?;
        attachments.push(OutboundAttachment {
            filename,
            content_type,
            data: data.to_vec(),
        });
    }

    let payload = payload.ok_or_else(|| AppError::invalid("missing 'payload' field"))?;
    let compose = ComposeInput {
        to: payload.to,
        cc: payload.cc,
        bcc: payload.bcc,
        subject: payload.subject,
        body_plain: payload.body_plain,
        body_html: payload.body_html,
        ..Default::default()
    };
    ops::send_email_with_attachments(&state, payload.account_id, compose, attachments).await?;
    Ok(Json(SendResult { sent: true }))
}

async fn reply_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<ReplyInput>,
) -> AppResult<Json<SendResult>> {
    ops::reply_email(
        &state,
        id,
        input.account_id,
        input.body_plain,
        input.body_html,
        input.quote_original,
    )
    .await?;
    Ok(Json(SendResult { sent: true }))
}

async fn forward_email(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(input): Json<ForwardInput>,
) -> AppResult<Json<SendResult>> {
    ops::forward_email(
        &state,
        id,
        input.account_id,
        input.to,
        input.body_plain,
        input.include_attachment_text,
    )
    .await?;
    Ok(Json(SendResult { sent: true }))
}

async fn status(State(state): State<Arc<AppState>>) -> AppResult<Json<StatusDto>> {
    let s = ops::status(&state).await?;
    Ok(Json(StatusDto {
        accounts_total: s.accounts_total,
        accounts_enabled: s.accounts_enabled,
        messages_total: s.messages_total,
        scheduler_running: s.scheduler_running,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_as_unprocessable_maps_db_conflict_to_422() {
        let err = AppError::Storage(DbError::Conflict("account name 'x' already exists".to_owned()));
        let response = conflict_as_unprocessable(err);
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn conflict_as_unprocessable_passes_through_other_errors() {
        let response = conflict_as_unprocessable(AppError::NotFound("account 1".to_owned()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
