//! Application error model with HTTP and MCP mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error
//! handling, and maps each variant both to an HTTP status code (for the
//! REST surface) and to an MCP `ErrorData` (for the `/llm/mcp` mirror).
//! Lower-level module errors (`db`, `imapclient`, `extract`, `smtp`) convert
//! into `AppError` via `#[from]` so handlers can use `?` uniformly.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Top-level application error
///
/// Covers every error case the ingestion pipeline, search engine, and HTTP
/// surface may encounter. Each variant maps to an HTTP status code per
/// spec.md §7 (400/404/409/500) and to an MCP error code for the RPC mirror.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (malformed request, invalid regex, duplicate name)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Resource not found (account, mailbox, message)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (bad IMAP/SMTP credentials)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (TCP connect, TLS handshake, IMAP/SMTP response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Referential conflict (delete blocked by dependents)
    #[error("conflict: {0}")]
    Conflict(String),
    /// Storage-layer failure
    #[error("storage error: {0}")]
    Storage(#[from] crate::db::DbError),
    /// IMAP transport failure
    #[error("imap error: {0}")]
    Imap(#[from] crate::imapclient::ImapError),
    /// SMTP transport failure
    #[error("smtp error: {0}")]
    Smtp(#[from] crate::smtp::SmtpError),
    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Map the error taxonomy to an HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Storage(crate::db::DbError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Storage(crate::db::DbError::Conflict(_)) => StatusCode::CONFLICT,
            Self::AuthFailed(_)
            | Self::Timeout(_)
            | Self::Storage(_)
            | Self::Imap(_)
            | Self::Smtp(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code, used in both HTTP and MCP bodies
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::AuthFailed(_) => "auth_failed",
            Self::Timeout(_) => "timeout",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "storage_error",
            Self::Imap(_) => "imap_error",
            Self::Smtp(_) => "smtp_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Convert to MCP `ErrorData` for the `/llm/mcp` tool mirror
    pub fn to_error_data(&self) -> ErrorData {
        let detail = json!({ "code": self.code() });
        match self {
            Self::InvalidInput(msg) => ErrorData::invalid_params(msg.clone(), Some(detail)),
            Self::NotFound(msg) => ErrorData::resource_not_found(msg.clone(), Some(detail)),
            Self::AuthFailed(msg) | Self::Conflict(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(detail))
            }
            other => ErrorData::internal_error(other.to_string(), Some(detail)),
        }
    }
}

/// Render as a JSON error body for axum handlers
///
/// Body shape: `{"error": "<detail>", "code": "<kind>"}`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let body = Json(json!({ "error": self.to_string(), "code": code }));
        (status, body).into_response()
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;
