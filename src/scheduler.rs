//! Account scheduler: parallel per-account polling with fan-out and
//! crash-safe, incremental progress
//!
//! One long-running cycle loop drives independent poller tasks, one per
//! enabled account. Each poller reuses a long-lived IMAP session keyed by
//! `(account id, host)`, owned exclusively by the scheduler's live client
//! map — no other code ever touches it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::{Duration, interval};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::db::{self, Account};
use crate::extract::Extractor;
use crate::imapclient::{self, FolderFetcher, ImapAccount, PooledSession};
use crate::policy::{self, AccountOverrides};
use crate::{canonicalize, errors::AppResult};

pub struct Scheduler {
    pool: PgPool,
    config: Arc<AppConfig>,
    extractor: Arc<Extractor>,
    sessions: Arc<Mutex<HashMap<(i64, String), PooledSession>>>,
    stop: Arc<Notify>,
    running: Arc<AtomicBool>,
}

/// Outcome of one account's poll cycle, surfaced for logging and for the
/// manual-trigger HTTP/MCP endpoint.
#[derive(Debug, Clone, Default)]
pub struct PollSummary {
    pub account_id: i64,
    pub messages_seen: u64,
    pub messages_inserted: u64,
    pub folders_polled: usize,
}

impl Scheduler {
    pub fn new(pool: PgPool, config: Arc<AppConfig>) -> Self {
        Self {
            pool,
            config,
            extractor: Arc::new(Extractor::new()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            stop: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run the cycle loop until [`Scheduler::stop`] is signalled. Never
    /// returns an error to the caller: cycle-level errors are logged and the
    /// loop backs off and continues.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = interval(Duration::from_secs(self.config.email_check_interval));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "poll cycle failed, backing off");
                        tokio::time::sleep(Duration::from_secs(
                            self.config.poll_error_backoff_secs(),
                        ))
                        .await;
                    }
                }
                _ = self.stop.notified() => {
                    info!("scheduler stopping, closing live IMAP sessions");
                    self.close_all_sessions().await;
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Whether the cycle loop is currently running, for the `/status`
    /// surface (spec.md §6 "processor state").
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn close_all_sessions(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, mut pooled) in sessions.drain() {
            imapclient::logout(&mut pooled.session).await;
        }
    }

    /// Query enabled accounts, snapshot each by value, and poll them
    /// concurrently. A single account's failure never aborts the others.
    async fn run_cycle(&self) -> AppResult<()> {
        let accounts = db::list_enabled_accounts(&self.pool).await?;
        let handles = accounts.into_iter().map(|account| {
            let this = self.clone_for_task();
            tokio::spawn(async move { this.poll_account(account).await })
        });

        for handle in handles {
            match handle.await {
                Ok(Ok(summary)) => info!(
                    account_id = summary.account_id,
                    messages_seen = summary.messages_seen,
                    messages_inserted = summary.messages_inserted,
                    folders = summary.folders_polled,
                    "poll cycle complete for account"
                ),
                Ok(Err(e)) => warn!(error = %e, "account poll failed"),
                Err(e) => warn!(error = %e, "poller task panicked"),
            }
        }
        Ok(())
    }

    fn clone_for_task(&self) -> SchedulerHandle {
        SchedulerHandle {
            pool: self.pool.clone(),
            config: self.config.clone(),
            extractor: self.extractor.clone(),
            sessions: self.sessions.clone(),
        }
    }

    /// Manual single-account trigger, reusing the exact poller routine.
    pub async fn poll_account_now(&self, account_id: i64) -> AppResult<PollSummary> {
        let account = db::get_account(&self.pool, account_id).await?;
        let handle = self.clone_for_task();
        handle.poll_account(account).await
    }
}

/// Cheap-to-clone handle shared by every spawned poller task.
#[derive(Clone)]
struct SchedulerHandle {
    pool: PgPool,
    config: Arc<AppConfig>,
    extractor: Arc<Extractor>,
    sessions: Arc<Mutex<HashMap<(i64, String), PooledSession>>>,
}

impl SchedulerHandle {
    /// Poll one account: connect (reusing a cached session when possible),
    /// re-list folders, fetch each folder in batches, canonicalize and
    /// upsert every message, and commit progress after each batch. Always
    /// updates `last_check`, even when the body of the poll fails partway.
    async fn poll_account(&self, account: Account) -> AppResult<PollSummary> {
        let mut summary = PollSummary {
            account_id: account.id,
            ..Default::default()
        };

        let result = self.poll_account_inner(&account, &mut summary).await;

        if let Err(e) = &result {
            warn!(account_id = account.id, error = %e, "poll cycle error for account");
            let _ = db::record_account_error(&self.pool, account.id, &e.to_string()).await;
        }
        // Unconditional, regardless of whether the body above succeeded.
        let _ = db::touch_last_check(&self.pool, account.id).await;

        result.map(|()| summary)
    }

    async fn poll_account_inner(
        &self,
        account: &Account,
        summary: &mut PollSummary,
    ) -> AppResult<()> {
        let overrides = AccountOverrides::from(account);
        let policy = policy::resolve(&self.config.global_policy, &overrides);
        let max_attachment_text_chars = self.config.global_policy.max_attachment_text_chars;

        let key = (account.id, account.imap_host.clone());
        self.ensure_session(&key, account).await?;

        // Take the session out of the shared map before doing any network
        // I/O: the map's lock must never be held across an `.await` that
        // blocks on IMAP or it would serialize every other account's
        // poller behind this one.
        let mut pooled = self
            .sessions
            .lock()
            .await
            .remove(&key)
            .expect("just inserted above");
        let folders_result = imapclient::list_folders(&account.imap_host, &mut pooled.session).await;
        self.sessions.lock().await.insert(key.clone(), pooled);
        let folders = folders_result?;

        for folder in folders {
            summary.folders_polled += 1;
            if let Err(e) = self
                .poll_folder(&key, &folder, account, &policy, max_attachment_text_chars, summary)
                .await
            {
                warn!(account_id = account.id, folder, error = %e, "folder poll failed, skipping");
                // A stale cached session likely caused this; drop it so the
                // next cycle reconnects cleanly.
                self.sessions.lock().await.remove(&key);
            }
        }

        Ok(())
    }

    async fn ensure_session(
        &self,
        key: &(i64, String),
        account: &Account,
    ) -> AppResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(key) {
            return Ok(());
        }
        let imap_account = ImapAccount {
            host: account.imap_host.clone(),
            port: account.imap_port as u16,
            use_ssl: account.imap_use_ssl,
            use_tls: account.imap_use_tls,
            username: account.username.clone(),
            password: account.password.clone(),
        };
        let session = imapclient::connect_authenticated(&imap_account).await?;
        sessions.insert(key.clone(), PooledSession { session });
        Ok(())
    }

    async fn poll_folder(
        &self,
        key: &(i64, String),
        folder: &str,
        account: &Account,
        policy: &policy::PolicyView,
        max_attachment_text_chars: usize,
        summary: &mut PollSummary,
    ) -> AppResult<()> {
        // As in `poll_account_inner`: own the session exclusively for the
        // duration of the fetch so the map lock is only ever held for the
        // cheap remove/insert, never across the IMAP fetch or the DB writes
        // ingestion does per message. Concurrent pollers for other accounts
        // must never block on this one's network I/O (spec.md §4.1, §5).
        let mut pooled = self
            .sessions
            .lock()
            .await
            .remove(key)
            .expect("session present");

        let result = self
            .fetch_folder(&mut pooled, folder, account, policy, max_attachment_text_chars, summary)
            .await;

        self.sessions.lock().await.insert(key.clone(), pooled);
        result
    }

    async fn fetch_folder(
        &self,
        pooled: &mut PooledSession,
        folder: &str,
        account: &Account,
        policy: &policy::PolicyView,
        max_attachment_text_chars: usize,
        summary: &mut PollSummary,
    ) -> AppResult<()> {
        let limit = Some(self.config.max_emails_per_batch);
        let mut fetcher = FolderFetcher::open(&mut pooled.session, folder, limit).await?;
        loop {
            let batch = fetcher.next_batch(&mut pooled.session).await?;
            if batch.is_empty() {
                break;
            }

            let batch_len = batch.len() as i64;
            for (uid, raw) in &batch {
                summary.messages_seen += 1;
                match canonicalize::ingest_message(
                    &self.pool,
                    account.id,
                    *uid,
                    raw,
                    policy,
                    &self.extractor,
                    max_attachment_text_chars,
                )
                .await
                {
                    Ok(canonicalize::IngestOutcome::Inserted { .. }) => {
                        summary.messages_inserted += 1;
                    }
                    Ok(canonicalize::IngestOutcome::Duplicate) => {}
                    Err(e) => {
                        warn!(account_id = account.id, uid, error = %e, "failed to ingest message, skipping");
                    }
                }
            }

            // Per-batch progress commit, independent of whether every
            // message in the batch inserted or was a duplicate — the source
            // counts batch size, not distinct inserts.
            db::increment_processed(&self.pool, account.id, batch_len).await?;

            if fetcher.remaining() == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_summary_defaults_to_zero() {
        let summary = PollSummary::default();
        assert_eq!(summary.messages_seen, 0);
        assert_eq!(summary.messages_inserted, 0);
    }
}
