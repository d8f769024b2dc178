//! Storage schema, connection pool, and transactional session helper
//!
//! Owns the relational representation of Account/Message/Attachment and the
//! queries the rest of the service needs. Write paths use an explicit
//! `pool.begin()` / `tx.commit()` transaction, matching the "context manager"
//! discipline spec'd for the ingestion pipeline: the pre-check for an
//! existing Message, its insert, and its attachments all commit as one unit.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Map a Postgres unique-violation into `DbError::Conflict`, everything else
/// into `DbError::Query`.
fn map_write_error(err: sqlx::Error, conflict_msg: &str) -> DbError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.code().as_deref() == Some("23505")
    {
        return DbError::Conflict(conflict_msg.to_owned());
    }
    DbError::Query(err)
}

/// Connect and run migrations, sized per the concurrency model (5 base + 10
/// overflow connections, pre-ping via `test_before_acquire`).
pub async fn connect(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(15)
        .min_connections(5)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        DbError::Query(sqlx::Error::Configuration(
            format!("migration failed: {e}").into(),
        ))
    })?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct Account {
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
    pub password: SecretString,
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

impl Account {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            account_address: row.try_get("account_address")?,
            imap_host: row.try_get("imap_host")?,
            imap_port: row.try_get("imap_port")?,
            imap_use_ssl: row.try_get("imap_use_ssl")?,
            imap_use_tls: row.try_get("imap_use_tls")?,
            smtp_host: row.try_get("smtp_host")?,
            smtp_port: row.try_get("smtp_port")?,
            smtp_use_ssl: row.try_get("smtp_use_ssl")?,
            smtp_use_tls: row.try_get("smtp_use_tls")?,
            username: row.try_get("username")?,
            password: SecretString::from(row.try_get::<String, _>("password")?),
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_check: row.try_get("last_check")?,
            last_error: row.try_get("last_error")?,
            total_emails_processed: row.try_get("total_emails_processed")?,
            store_text_only_override: row.try_get("store_text_only_override")?,
            max_attachment_size_override: row.try_get("max_attachment_size_override")?,
            extract_pdf_override: row.try_get("extract_pdf_override")?,
            extract_word_override: row.try_get("extract_word_override")?,
            extract_image_override: row.try_get("extract_image_override")?,
            extract_other_override: row.try_get("extract_other_override")?,
        })
    }
}

/// Fields accepted on account create; unset overrides are left `None`.
#[derive(Debug, Clone)]
pub struct NewAccount {
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
    pub password: SecretString,
    pub store_text_only_override: Option<bool>,
    pub max_attachment_size_override: Option<i64>,
    pub extract_pdf_override: Option<bool>,
    pub extract_word_override: Option<bool>,
    pub extract_image_override: Option<bool>,
    pub extract_other_override: Option<bool>,
}

/// Partial update; every field is "leave unchanged unless Some".
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub account_address: Option<Option<String>>,
    pub imap_host: Option<String>,
    pub imap_port: Option<i32>,
    pub imap_use_ssl: Option<bool>,
    pub imap_use_tls: Option<bool>,
    pub smtp_host: Option<Option<String>>,
    pub smtp_port: Option<Option<i32>>,
    pub smtp_use_ssl: Option<bool>,
    pub smtp_use_tls: Option<bool>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub enabled: Option<bool>,
    pub store_text_only_override: Option<Option<bool>>,
    pub max_attachment_size_override: Option<Option<i64>>,
    pub extract_pdf_override: Option<Option<bool>>,
    pub extract_word_override: Option<Option<bool>>,
    pub extract_image_override: Option<Option<bool>>,
    pub extract_other_override: Option<Option<bool>>,
}

pub async fn create_account(pool: &PgPool, new: &NewAccount) -> DbResult<Account> {
    let row = sqlx::query(
        r#"INSERT INTO accounts (
            name, account_address, imap_host, imap_port, imap_use_ssl, imap_use_tls,
            smtp_host, smtp_port, smtp_use_ssl, smtp_use_tls, username, password,
            store_text_only_override, max_attachment_size_override,
            extract_pdf_override, extract_word_override, extract_image_override, extract_other_override
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
        RETURNING *"#,
    )
    .bind(&new.name)
    .bind(&new.account_address)
    .bind(&new.imap_host)
    .bind(new.imap_port)
    .bind(new.imap_use_ssl)
    .bind(new.imap_use_tls)
    .bind(&new.smtp_host)
    .bind(new.smtp_port)
    .bind(new.smtp_use_ssl)
    .bind(new.smtp_use_tls)
    .bind(&new.username)
    .bind(new.password.expose_secret())
    .bind(new.store_text_only_override)
    .bind(new.max_attachment_size_override)
    .bind(new.extract_pdf_override)
    .bind(new.extract_word_override)
    .bind(new.extract_image_override)
    .bind(new.extract_other_override)
    .fetch_one(pool)
    .await
    .map_err(|e| map_write_error(e, format!("account name '{}' already exists", new.name).as_str()))?;
    Account::from_row(&row).map_err(DbError::from)
}

pub async fn get_account(pool: &PgPool, id: i64) -> DbResult<Account> {
    let row = sqlx::query("SELECT * FROM accounts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("account {id} not found")))?;
    Account::from_row(&row).map_err(DbError::from)
}

pub async fn list_accounts(pool: &PgPool) -> DbResult<Vec<Account>> {
    let rows = sqlx::query("SELECT * FROM accounts ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Account::from_row).collect::<Result<_, _>>().map_err(DbError::from)
}

pub async fn list_enabled_accounts(pool: &PgPool) -> DbResult<Vec<Account>> {
    let rows = sqlx::query("SELECT * FROM accounts WHERE enabled = true ORDER BY id ASC")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Account::from_row).collect::<Result<_, _>>().map_err(DbError::from)
}

pub async fn update_account(pool: &PgPool, id: i64, update: &AccountUpdate) -> DbResult<Account> {
    let current = get_account(pool, id).await?;

    let name = update.name.clone().unwrap_or(current.name);
    let account_address = update
        .account_address
        .clone()
        .unwrap_or(current.account_address);
    let imap_host = update.imap_host.clone().unwrap_or(current.imap_host);
    let imap_port = update.imap_port.unwrap_or(current.imap_port);
    let imap_use_ssl = update.imap_use_ssl.unwrap_or(current.imap_use_ssl);
    let imap_use_tls = update.imap_use_tls.unwrap_or(current.imap_use_tls);
    let smtp_host = update.smtp_host.clone().unwrap_or(current.smtp_host);
    let smtp_port = update.smtp_port.unwrap_or(current.smtp_port);
    let smtp_use_ssl = update.smtp_use_ssl.unwrap_or(current.smtp_use_ssl);
    let smtp_use_tls = update.smtp_use_tls.unwrap_or(current.smtp_use_tls);
    let username = update.username.clone().unwrap_or(current.username);
    let password = update
        .password
        .clone()
        .unwrap_or(current.password.clone());
    let enabled = update.enabled.unwrap_or(current.enabled);
    let store_text_only_override = update
        .store_text_only_override
        .unwrap_or(current.store_text_only_override);
    let max_attachment_size_override = update
        .max_attachment_size_override
        .unwrap_or(current.max_attachment_size_override);
    let extract_pdf_override = update
        .extract_pdf_override
        .unwrap_or(current.extract_pdf_override);
    let extract_word_override = update
        .extract_word_override
        .unwrap_or(current.extract_word_override);
    let extract_image_override = update
        .extract_image_override
        .unwrap_or(current.extract_image_override);
    let extract_other_override = update
        .extract_other_override
        .unwrap_or(current.extract_other_override);

    let row = sqlx::query(
        r#"UPDATE accounts SET
            name = $1, account_address = $2, imap_host = $3, imap_port = $4,
            imap_use_ssl = $5, imap_use_tls = $6, smtp_host = $7, smtp_port = $8,
            smtp_use_ssl = $9, smtp_use_tls = $10, username = $11, password = $12,
            enabled = $13, store_text_only_override = $14, max_attachment_size_override = $15,
            extract_pdf_override = $16, extract_word_override = $17,
            extract_image_override = $18, extract_other_override = $19,
            updated_at = now()
        WHERE id = $20
        RETURNING *"#,
    )
    .bind(&name)
    .bind(&account_address)
    .bind(&imap_host)
    .bind(imap_port)
    .bind(imap_use_ssl)
    .bind(imap_use_tls)
    .bind(&smtp_host)
    .bind(smtp_port)
    .bind(smtp_use_ssl)
    .bind(smtp_use_tls)
    .bind(&username)
    .bind(password.expose_secret())
    .bind(enabled)
    .bind(store_text_only_override)
    .bind(max_attachment_size_override)
    .bind(extract_pdf_override)
    .bind(extract_word_override)
    .bind(extract_image_override)
    .bind(extract_other_override)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(|e| map_write_error(e, format!("account name '{name}' already exists").as_str()))?;
    Account::from_row(&row).map_err(DbError::from)
}

pub async fn delete_account(pool: &PgPool, id: i64) -> DbResult<()> {
    let referenced: i64 = sqlx::query_scalar("SELECT count(*) FROM messages WHERE account_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if referenced > 0 {
        return Err(DbError::Conflict(format!(
            "account {id} is referenced by {referenced} message(s)"
        )));
    }
    let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("account {id} not found")));
    }
    Ok(())
}

/// Record a poll-cycle failure for display on `/status` and the account
/// detail endpoint.
pub async fn record_account_error(pool: &PgPool, id: i64, message: &str) -> DbResult<()> {
    sqlx::query("UPDATE accounts SET last_error = $1 WHERE id = $2")
        .bind(message)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Separate short transaction: bump the running processed-count and clear
/// any prior error, after a batch has fully committed.
pub async fn increment_processed(pool: &PgPool, id: i64, by: i64) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE accounts SET total_emails_processed = total_emails_processed + $1 WHERE id = $2",
    )
    .bind(by)
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Separate short transaction, run unconditionally on poller exit.
pub async fn touch_last_check(pool: &PgPool, id: i64) -> DbResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE accounts SET last_check = now() WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub account_id: i64,
    pub message_id: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub email_date: DateTime<Utc>,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub attachment_count: i32,
}

impl Message {
    pub(crate) fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            message_id: row.try_get("message_id")?,
            sender: row.try_get("sender")?,
            recipient: row.try_get("recipient")?,
            subject: row.try_get("subject")?,
            email_date: row.try_get("email_date")?,
            body_plain: row.try_get("body_plain")?,
            body_html: row.try_get("body_html")?,
            processed_at: row.try_get("processed_at")?,
            attachment_count: row.try_get("attachment_count")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub account_id: i64,
    pub message_id: String,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub email_date: DateTime<Utc>,
    pub body_plain: Option<String>,
    pub body_html: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub size: i64,
    pub text_content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub content_type: String,
    pub content_id: Option<String>,
    pub size: i64,
    pub text_content: Option<String>,
}

impl Attachment {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            filename: row.try_get("filename")?,
            content_type: row.try_get("content_type")?,
            content_id: row.try_get("content_id")?,
            size: row.try_get("size")?,
            text_content: row.try_get("text_content")?,
        })
    }
}

/// Returns `None` when a message with this Message-ID already exists (the
/// idempotency point — canonicalization treats this as "already processed").
/// Otherwise inserts the message and its attachments as a single transaction
/// and returns the stored row with its attachments.
pub async fn upsert_message(
    pool: &PgPool,
    message: &NewMessage,
    attachments: &[NewAttachment],
) -> DbResult<Option<(Message, Vec<Attachment>)>> {
    let mut tx = pool.begin().await?;

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM messages WHERE message_id = $1")
            .bind(&message.message_id)
            .fetch_optional(&mut *tx)
            .await?;
    if existing.is_some() {
        tx.rollback().await?;
        return Ok(None);
    }

    let row = sqlx::query(
        r#"INSERT INTO messages
            (account_id, message_id, sender, recipient, subject, email_date, body_plain, body_html, attachment_count)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        RETURNING *"#,
    )
    .bind(message.account_id)
    .bind(&message.message_id)
    .bind(&message.sender)
    .bind(&message.recipient)
    .bind(&message.subject)
    .bind(message.email_date)
    .bind(&message.body_plain)
    .bind(&message.body_html)
    .bind(attachments.len() as i32)
    .fetch_one(&mut *tx)
    .await?;
    let stored = Message::from_row(&row)?;

    let mut stored_attachments = Vec::with_capacity(attachments.len());
    for a in attachments {
        let arow = sqlx::query(
            r#"INSERT INTO attachments (message_id, filename, content_type, content_id, size, text_content)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING *"#,
        )
        .bind(stored.id)
        .bind(&a.filename)
        .bind(&a.content_type)
        .bind(&a.content_id)
        .bind(a.size)
        .bind(&a.text_content)
        .fetch_one(&mut *tx)
        .await?;
        stored_attachments.push(Attachment::from_row(&arow)?);
    }

    tx.commit().await?;
    Ok(Some((stored, stored_attachments)))
}

pub async fn get_message(pool: &PgPool, id: i64) -> DbResult<Message> {
    let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("message {id} not found")))?;
    Message::from_row(&row).map_err(DbError::from)
}

pub async fn list_attachments(pool: &PgPool, message_id: i64) -> DbResult<Vec<Attachment>> {
    let rows = sqlx::query("SELECT * FROM attachments WHERE message_id = $1 ORDER BY id ASC")
        .bind(message_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(Attachment::from_row).collect::<Result<_, _>>().map_err(DbError::from)
}

pub async fn list_messages_page(pool: &PgPool, skip: i64, limit: i64) -> DbResult<(Vec<Message>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT count(*) FROM messages").fetch_one(pool).await?;
    let rows = sqlx::query("SELECT * FROM messages ORDER BY email_date DESC OFFSET $1 LIMIT $2")
        .bind(skip)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    let messages = rows.iter().map(Message::from_row).collect::<Result<_, _>>()?;
    Ok((messages, total))
}

pub async fn delete_message(pool: &PgPool, id: i64) -> DbResult<()> {
    let result = sqlx::query("DELETE FROM messages WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound(format!("message {id} not found")));
    }
    Ok(())
}

pub async fn count_messages(pool: &PgPool) -> DbResult<i64> {
    let total: i64 = sqlx::query_scalar("SELECT count(*) FROM messages").fetch_one(pool).await?;
    Ok(total)
}

pub async fn count_accounts(pool: &PgPool) -> DbResult<(i64, i64)> {
    let row = sqlx::query("SELECT count(*) AS total, count(*) FILTER (WHERE enabled) AS enabled FROM accounts")
        .fetch_one(pool)
        .await?;
    Ok((row.try_get("total")?, row.try_get("enabled")?))
}

#[cfg(test)]
mod tests {
    use super::map_write_error;

    #[test]
    fn non_database_errors_pass_through_as_query_errors() {
        let err = sqlx::Error::RowNotFound;
        match map_write_error(err, "unused") {
            super::DbError::Query(sqlx::Error::RowNotFound) => {}
            other => panic!("expected passthrough Query error, got {other:?}"),
        }
    }
}
