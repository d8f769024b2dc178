//! Configuration module for server-wide and policy settings
//!
//! All configuration is loaded from environment variables under the
//! `EMAILSERVER_` prefix (spec.md §6). Per-account IMAP/SMTP settings are
//! **not** read from the environment — they live in the `accounts` table
//! (see [`crate::db::models::Account`]) and are managed over HTTP.
//! [`GlobalPolicy`] is the process-wide half of the policy merge described
//! in [`crate::policy`].

use std::env;
use std::env::VarError;

use crate::errors::{AppError, AppResult};

/// Server-wide configuration
///
/// Populated once at startup from the environment and owned by the
/// top-level service object (never a global, per the Design Notes).
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string
    pub database_url: String,
    /// HTTP bind address
    pub api_host: String,
    /// HTTP bind port
    pub api_port: u16,
    /// Default SMTP host, used when an account does not override it
    pub smtp_host: Option<String>,
    /// Default SMTP port
    pub smtp_port: Option<u16>,
    /// Poll cycle interval in seconds (default 30)
    pub email_check_interval: u64,
    /// Maximum messages fetched per account per poll cycle (default 50)
    pub max_emails_per_batch: usize,
    /// Global extraction/storage policy defaults
    pub global_policy: GlobalPolicy,
    /// Log verbosity filter (passed to `tracing_subscriber::EnvFilter`)
    pub log_level: String,
    /// Optional log file path; a file sink is only added when set
    pub log_file: Option<String>,
}

/// Global policy defaults merged against per-account overrides
///
/// See [`crate::policy::resolve`] for the merge semantics ("global stronger
/// negative").
#[derive(Debug, Clone, Copy)]
pub struct GlobalPolicy {
    /// Store only extracted text for attachments, never raw bytes (raw
    /// bytes are never persisted regardless; this flag additionally gates
    /// whether extraction runs at all)
    pub store_text_only: bool,
    /// Maximum attachment size, in bytes, eligible for text extraction
    pub max_attachment_size: i64,
    /// Maximum characters retained from any single extracted attachment text
    pub max_attachment_text_chars: usize,
    /// Enable PDF text extraction globally
    pub extract_pdf: bool,
    /// Enable word-processor (doc/docx/odt) text extraction globally
    pub extract_word: bool,
    /// Enable image OCR extraction globally
    pub extract_image: bool,
    /// Enable other textual family (csv/xml/json/rtf/plain/spreadsheet/
    /// presentation) extraction globally
    pub extract_other: bool,
}

impl AppConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `EMAILSERVER_DATABASE_URL` is missing, or
    /// any numeric/boolean variable is set but malformed.
    pub fn load_from_env() -> AppResult<Self> {
        Ok(Self {
            database_url: required_env("EMAILSERVER_DATABASE_URL")?,
            api_host: env::var("EMAILSERVER_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned()),
            api_port: parse_u16_env("EMAILSERVER_API_PORT", 8080)?,
            smtp_host: optional_env("EMAILSERVER_SMTP_HOST"),
            smtp_port: match env::var("EMAILSERVER_SMTP_PORT") {
                Ok(v) => Some(v.parse::<u16>().map_err(|_| {
                    AppError::InvalidInput("invalid EMAILSERVER_SMTP_PORT".to_owned())
                })?),
                Err(_) => None,
            },
            email_check_interval: parse_u64_env("EMAILSERVER_EMAIL_CHECK_INTERVAL", 30)?,
            max_emails_per_batch: parse_usize_env("EMAILSERVER_MAX_EMAILS_PER_BATCH", 50)?,
            global_policy: GlobalPolicy {
                store_text_only: parse_bool_env("EMAILSERVER_STORE_TEXT_ONLY", false)?,
                max_attachment_size: parse_i64_env(
                    "EMAILSERVER_MAX_ATTACHMENT_SIZE",
                    10_000_000,
                )?,
                max_attachment_text_chars: parse_usize_env(
                    "EMAILSERVER_MAX_ATTACHMENT_SIZE_TEXT",
                    200_000,
                )?,
                extract_pdf: parse_bool_env("EMAILSERVER_EXTRACT_PDF", true)?,
                extract_word: parse_bool_env("EMAILSERVER_EXTRACT_WORD", true)?,
                extract_image: parse_bool_env("EMAILSERVER_EXTRACT_IMAGE", false)?,
                extract_other: parse_bool_env("EMAILSERVER_EXTRACT_OTHER", true)?,
            },
            log_level: env::var("EMAILSERVER_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned()),
            log_file: optional_env("EMAILSERVER_LOG_FILE"),
        })
    }

    /// Poll cycle extended back-off, applied after a cycle-level error
    /// (spec.md §4.1, default 60s)
    pub fn poll_error_backoff_secs(&self) -> u64 {
        60
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Parse a boolean environment variable with flexible values
///
/// Accepts: `1`, `true`, `yes`, `y`, `on` (truthy) or `0`, `false`, `no`,
/// `n`, `off` (falsy). Case-insensitive. Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set to an unrecognized value.
fn parse_bool_env(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Ok(v) => parse_bool_value(&v).ok_or_else(|| {
            AppError::InvalidInput(format!("invalid boolean environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_bool_value(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse an `i64` environment variable with default fallback
fn parse_i64_env(key: &str, default: i64) -> AppResult<i64> {
    match env::var(key) {
        Ok(v) => v.parse::<i64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid i64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `usize` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `usize`.
fn parse_usize_env(key: &str, default: usize) -> AppResult<usize> {
    match env::var(key) {
        Ok(v) => v.parse::<usize>().map_err(|_| {
            AppError::InvalidInput(format!("invalid usize environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool_value;

    #[test]
    fn parse_bool_value_accepts_common_truthy_and_falsy_values() {
        for truthy in ["1", "true", "TRUE", " yes ", "Y", "on"] {
            assert_eq!(parse_bool_value(truthy), Some(true));
        }

        for falsy in ["0", "false", "FALSE", " no ", "N", "off"] {
            assert_eq!(parse_bool_value(falsy), Some(false));
        }
    }

    #[test]
    fn parse_bool_value_rejects_unrecognized_values() {
        for invalid in ["", "2", "maybe", "enabled", "disabled"] {
            assert_eq!(parse_bool_value(invalid), None);
        }
    }
}
