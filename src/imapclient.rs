//! IMAP client: connection lifecycle, folder enumeration, batched fetch
//!
//! Generalizes the teacher's single-account, timeout-wrapped `imap.rs`
//! primitives into the full connect → login → enumerate → fetch state
//! machine this service needs, reused across poll cycles via
//! [`PooledSession`].

use std::sync::Arc;
use std::time::Duration;

use async_imap::types::Fetch;
use async_imap::{Client, Session};
use futures::TryStreamExt;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::warn;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum ImapError {
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type ImapResult<T> = Result<T, ImapError>;

pub struct ImapAccount {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub use_tls: bool,
    pub username: String,
    pub password: SecretString,
}

/// An authenticated session, over either an implicit-SSL or STARTTLS-
/// upgraded stream. Both paths end up at the same TLS stream type since the
/// service never accepts plaintext IMAP.
pub type ImapSession = Session<TlsStream<TcpStream>>;

/// A long-lived session reused across poll cycles, keyed by `(account id,
/// host)` in the scheduler's client map.
pub struct PooledSession {
    pub session: ImapSession,
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Read one CRLF-terminated line from a raw TCP stream, byte by byte so no
/// bytes belonging to a subsequent TLS handshake are consumed.
async fn read_line_raw(stream: &mut TcpStream) -> ImapResult<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| ImapError::Transport(format!("read failed: {e}")))?;
        if n == 0 {
            break;
        }
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Connect and authenticate, per spec.md §4.6's connect policy: direct SSL
/// when `use_ssl`, else plaintext STARTTLS negotiated immediately after the
/// greeting when `use_tls`.
pub async fn connect_authenticated(account: &ImapAccount) -> ImapResult<ImapSession> {
    let tcp = timeout(
        CONNECT_TIMEOUT,
        TcpStream::connect((account.host.as_str(), account.port)),
    )
    .await
    .map_err(|_| ImapError::Timeout("tcp connect timeout".to_owned()))
    .and_then(|r| r.map_err(|e| ImapError::Transport(format!("tcp connect failed: {e}"))))?;

    let server_name = ServerName::try_from(account.host.clone())
        .map_err(|_| ImapError::Transport("invalid host for TLS SNI".to_owned()))?;

    let mut tcp = tcp;
    if account.use_tls && !account.use_ssl {
        // Drain the plaintext greeting, then negotiate STARTTLS before the
        // TLS handshake begins.
        let _greeting = read_line_raw(&mut tcp).await?;
        tcp.write_all(b"a1 STARTTLS\r\n")
            .await
            .map_err(|e| ImapError::Transport(format!("STARTTLS write failed: {e}")))?;
        let response = read_line_raw(&mut tcp).await?;
        if !response.to_ascii_uppercase().contains("OK") {
            return Err(ImapError::Transport(format!(
                "STARTTLS rejected by server: {response}"
            )));
        }
    }

    let connector = tls_connector();
    let tls_stream = timeout(COMMAND_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| ImapError::Timeout("TLS handshake timeout".to_owned()))
        .and_then(|r| r.map_err(|e| ImapError::Transport(format!("TLS handshake failed: {e}"))))?;

    let mut client = Client::new(tls_stream);
    if account.use_ssl {
        let greeting = timeout(COMMAND_TIMEOUT, client.read_response())
            .await
            .map_err(|_| ImapError::Timeout("IMAP greeting timeout".to_owned()))
            .and_then(|r| r.map_err(|e| ImapError::Transport(format!("greeting failed: {e}"))))?;
        if greeting.is_none() {
            return Err(ImapError::Transport(
                "server closed connection before greeting".to_owned(),
            ));
        }
    }

    let pass = account.password.expose_secret();
    timeout(COMMAND_TIMEOUT, client.login(account.username.as_str(), pass))
        .await
        .map_err(|_| ImapError::Timeout("LOGIN timeout".to_owned()))
        .and_then(|r| r.map_err(|(e, _)| ImapError::AuthFailed(e.to_string())))
}

/// Enumerate visible folders. Gmail hosts fold to a single "All Mail"
/// folder; other providers enumerate the full LIST response.
pub async fn list_folders(host: &str, session: &mut ImapSession) -> ImapResult<Vec<String>> {
    let stream = timeout(COMMAND_TIMEOUT, session.list(None, Some("*")))
        .await
        .map_err(|_| ImapError::Timeout("LIST timed out".to_owned()))
        .and_then(|r| r.map_err(|e| ImapError::Transport(format!("LIST failed: {e}"))))?;
    let names: Vec<async_imap::types::Name> = timeout(COMMAND_TIMEOUT, stream.try_collect())
        .await
        .map_err(|_| ImapError::Timeout("LIST stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| ImapError::Transport(format!("LIST stream failed: {e}"))))?;

    let mut folders: Vec<String> = names
        .into_iter()
        .map(|n| n.name().to_owned())
        .filter(|n| !matches!(n.as_str(), "." | "/" | "\\"))
        .collect();

    if host.to_ascii_lowercase().ends_with("gmail.com") {
        const ALL_MAIL_CANDIDATES: [&str; 2] = ["[Gmail]/All Mail", "[Gmail]/Alle Nachrichten"];
        let all_mail = ALL_MAIL_CANDIDATES
            .iter()
            .find(|candidate| folders.iter().any(|f| f == *candidate))
            .map(|s| s.to_string())
            .unwrap_or_else(|| "INBOX".to_owned());
        return Ok(vec![all_mail]);
    }

    Ok(folders)
}

/// A batched fetcher over one selected folder: selects, searches `ALL`,
/// and emits fixed-size batches of raw RFC822 bytes keyed by UID.
pub struct FolderFetcher {
    uids: std::collections::VecDeque<u32>,
}

impl FolderFetcher {
    /// Select `folder` read-only, search `ALL`, and (if `limit` is given and
    /// smaller than the result) keep only the most recent `limit` UIDs.
    pub async fn open(
        session: &mut ImapSession,
        folder: &str,
        limit: Option<usize>,
    ) -> ImapResult<Self> {
        timeout(COMMAND_TIMEOUT, session.examine(folder))
            .await
            .map_err(|_| ImapError::Timeout(format!("EXAMINE timed out for '{folder}'")))
            .and_then(|r| r.map_err(|e| ImapError::Transport(format!("EXAMINE failed: {e}"))))?;

        let set = timeout(COMMAND_TIMEOUT, session.uid_search("ALL"))
            .await
            .map_err(|_| ImapError::Timeout("SEARCH timed out".to_owned()))
            .and_then(|r| r.map_err(|e| ImapError::Transport(format!("SEARCH failed: {e}"))))?;

        let mut uids: Vec<u32> = set.into_iter().collect();
        uids.sort_unstable();
        if let Some(limit) = limit
            && uids.len() > limit
        {
            uids = uids.split_off(uids.len() - limit);
        }

        Ok(Self {
            uids: uids.into(),
        })
    }

    pub fn remaining(&self) -> usize {
        self.uids.len()
    }

    /// Fetch up to `BATCH_SIZE` messages. A per-message fetch failure is
    /// logged and the UID skipped; the batch still returns whatever
    /// succeeded. Returns an empty vec once the UID list is exhausted.
    pub async fn next_batch(
        &mut self,
        session: &mut ImapSession,
    ) -> ImapResult<Vec<(u32, Vec<u8>)>> {
        let mut batch = Vec::with_capacity(BATCH_SIZE);
        while batch.len() < BATCH_SIZE {
            let Some(uid) = self.uids.pop_front() else {
                break;
            };
            match fetch_raw(session, uid).await {
                Ok(raw) => batch.push((uid, raw)),
                Err(e) => {
                    warn!(uid, error = %e, "failed to fetch message, skipping");
                }
            }
        }
        Ok(batch)
    }
}

async fn fetch_raw(session: &mut ImapSession, uid: u32) -> ImapResult<Vec<u8>> {
    let stream = timeout(COMMAND_TIMEOUT, session.uid_fetch(uid.to_string(), "RFC822"))
        .await
        .map_err(|_| ImapError::Timeout("UID FETCH timed out".to_owned()))
        .and_then(|r| r.map_err(|e| ImapError::Transport(format!("UID FETCH failed: {e}"))))?;
    let fetches: Vec<Fetch> = timeout(COMMAND_TIMEOUT, stream.try_collect())
        .await
        .map_err(|_| ImapError::Timeout("UID FETCH stream timed out".to_owned()))
        .and_then(|r| r.map_err(|e| ImapError::Transport(format!("fetch stream failed: {e}"))))?;

    fetches
        .into_iter()
        .next()
        .and_then(|f| f.body().map(<[u8]>::to_vec))
        .ok_or_else(|| ImapError::Transport(format!("uid {uid} has no RFC822 body")))
}

/// Query server capabilities, used by the account connectivity check.
pub async fn capabilities(
    session: &mut ImapSession,
) -> ImapResult<async_imap::types::Capabilities> {
    timeout(COMMAND_TIMEOUT, session.capabilities())
        .await
        .map_err(|_| ImapError::Timeout("CAPABILITY timed out".to_owned()))
        .and_then(|r| r.map_err(|e| ImapError::Transport(format!("CAPABILITY failed: {e}"))))
}

/// Best-effort logout, used on both clean shutdown and scheduler drop.
pub async fn logout(session: &mut ImapSession) {
    if let Err(e) = timeout(COMMAND_TIMEOUT, session.logout()).await {
        warn!(error = %e, "IMAP logout timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gmail_folder_list_filters_delimiter_tokens() {
        let folders = vec![".".to_owned(), "/".to_owned(), "INBOX".to_owned()];
        let filtered: Vec<String> = folders
            .into_iter()
            .filter(|n| !matches!(n.as_str(), "." | "/" | "\\"))
            .collect();
        assert_eq!(filtered, vec!["INBOX".to_owned()]);
    }
}
