//! Shared application state handed to both the HTTP and MCP surfaces
//!
//! A single `AppState` owns the pool, the resolved config, and the
//! scheduler — the "top-level service object" the Design Notes call for
//! instead of globals. Both `http::router` and `mcp::MailVaultMcp` borrow
//! the same `Arc<AppState>`.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Arc<AppConfig>) -> Self {
        let scheduler = Arc::new(Scheduler::new(pool.clone(), config.clone()));
        Self {
            pool,
            config,
            scheduler,
        }
    }
}
