//! emailserver: multi-account IMAP ingestion, indexing, and search
//!
//! Polls configured IMAP accounts on a schedule, extracts and indexes
//! message/attachment text, and exposes the result over both a REST API and
//! an MCP tool mirror mounted on the same axum server.
//!
//! # Architecture
//!
//! - [`main`]: process entry point — config, tracing, DB connect, scheduler,
//!   HTTP+MCP server
//! - [`config`]: environment-driven server configuration
//! - [`state`]: the shared `AppState` handed to both surfaces
//! - [`db`]: account/message/attachment storage
//! - [`dto`]: wire-format DTOs shared by `http` and `mcp`
//! - [`ops`]: business logic shared by `http` and `mcp`
//! - [`http`]: `/api/v1` REST routes
//! - [`mcp`]: `/llm/mcp` MCP tool mirror
//! - [`imapclient`]: IMAP transport/session operations
//! - [`scheduler`]: per-account poll loop and batched ingestion
//! - [`canonicalize`]: MIME parsing into the message/attachment shape
//! - [`attachments`]: attachment filename/size policy and text extraction dispatch
//! - [`extract`]: per-format text extraction (PDF, Word, OCR, …)
//! - [`policy`]: account/global extraction policy merge
//! - [`search`]: SQL-filtered, regex-matched message search
//! - [`smtp`]: outbound send/reply/forward composition
//! - [`errors`]: application error model with HTTP and MCP mapping

mod attachments;
mod canonicalize;
mod config;
mod db;
mod dto;
mod errors;
mod extract;
mod http;
mod imapclient;
mod mcp;
mod ops;
mod policy;
mod scheduler;
mod search;
mod smtp;
mod state;

use std::sync::Arc;

use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use state::AppState;

/// Process entry point
///
/// Loads configuration, connects to Postgres (running migrations), starts
/// the scheduler as a background task, and serves `/api/v1` (REST) and
/// `/llm/mcp` (MCP) on the same listener until `Ctrl+C`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load_from_env()?;
    init_tracing(&config);

    let pool = db::connect(&config.database_url).await?;
    let state = Arc::new(AppState::new(pool, Arc::new(config.clone())));

    let scheduler_handle = state.scheduler.clone();
    let poll_loop = tokio::spawn(async move { scheduler_handle.run().await });

    let mcp_state = state.clone();
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp::MailVaultMcp::new(mcp_state.clone())),
        Arc::new(LocalSessionManager::default()),
        Default::default(),
    );

    let app = axum::Router::new()
        .nest("/api/v1", http::router(state.clone()))
        .nest_service("/llm/mcp", mcp_service);

    let addr = format!("{}:{}", config.api_host, config.api_port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr, "emailserver listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.scheduler.stop();
    // Give the scheduler's run loop a chance to observe the stop signal and
    // log out of its cached IMAP sessions before falling back to a hard
    // cancel, instead of aborting it unconditionally.
    let abort_handle = poll_loop.abort_handle();
    if tokio::time::timeout(std::time::Duration::from_secs(10), poll_loop)
        .await
        .is_err()
    {
        tracing::warn!("scheduler did not stop within 10s, aborting it");
        abort_handle.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Initialize structured logging: stderr always, plus an optional file sink
/// when `EMAILSERVER_LOG_FILE` is set.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("failed to open log file");
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
