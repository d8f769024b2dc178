//! Policy resolver: merges global defaults with one Account's overrides
//!
//! Implements the "global stronger negative" rule: a feature disabled
//! globally can never be re-enabled by an account, and a numeric limit only
//! ever shrinks under an override, never grows.

use crate::config::GlobalPolicy;
use crate::db::Account;

/// Effective, resolved policy for one account. Ephemeral — never persisted.
#[derive(Debug, Clone, Copy)]
pub struct PolicyView {
    pub store_text_only: bool,
    pub max_attachment_size: i64,
    pub extract_pdf: bool,
    pub extract_word: bool,
    pub extract_image: bool,
    pub extract_other: bool,
}

/// Tri-valued per-account overrides, as stored on the `accounts` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountOverrides {
    pub store_text_only: Option<bool>,
    pub max_attachment_size: Option<i64>,
    pub extract_pdf: Option<bool>,
    pub extract_word: Option<bool>,
    pub extract_image: Option<bool>,
    pub extract_other: Option<bool>,
}

impl From<&Account> for AccountOverrides {
    fn from(account: &Account) -> Self {
        Self {
            store_text_only: account.store_text_only_override,
            max_attachment_size: account.max_attachment_size_override,
            extract_pdf: account.extract_pdf_override,
            extract_word: account.extract_word_override,
            extract_image: account.extract_image_override,
            extract_other: account.extract_other_override,
        }
    }
}

/// Resolve effective policy for an account given global defaults.
pub fn resolve(global: &GlobalPolicy, account: &AccountOverrides) -> PolicyView {
    PolicyView {
        store_text_only: resolve_boolean(global.store_text_only, account.store_text_only),
        max_attachment_size: resolve_max_value(
            global.max_attachment_size,
            account.max_attachment_size,
        ),
        extract_pdf: resolve_boolean(global.extract_pdf, account.extract_pdf),
        extract_word: resolve_boolean(global.extract_word, account.extract_word),
        extract_image: resolve_boolean(global.extract_image, account.extract_image),
        extract_other: resolve_boolean(global.extract_other, account.extract_other),
    }
}

fn resolve_boolean(global: bool, account: Option<bool>) -> bool {
    match account {
        None => global,
        Some(v) => global && v,
    }
}

fn resolve_max_value(global: i64, account: Option<i64>) -> i64 {
    match account {
        None => global,
        Some(v) => global.min(v),
    }
}

/// Select the per-family extraction flag for a MIME type, per the dispatch
/// table in the text extractor.
pub fn should_extract_text(policy: &PolicyView, mime_type: &str) -> bool {
    let lower = mime_type.to_ascii_lowercase();
    match lower.as_str() {
        "application/pdf" => policy.extract_pdf,
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            policy.extract_word
        }
        other if other.starts_with("image/") => policy.extract_image,
        other if other.starts_with("text/") => policy.extract_other,
        "application/json" | "application/xml" | "application/csv" | "application/rtf" => {
            policy.extract_other
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_all_enabled() -> GlobalPolicy {
        GlobalPolicy {
            store_text_only: false,
            max_attachment_size: 10_000_000,
            max_attachment_text_chars: 200_000,
            extract_pdf: true,
            extract_word: true,
            extract_image: false,
            extract_other: true,
        }
    }

    #[test]
    fn global_disabled_wins_over_account_enabled() {
        let global = GlobalPolicy {
            extract_pdf: false,
            ..global_all_enabled()
        };
        let account = AccountOverrides {
            extract_pdf: Some(true),
            ..Default::default()
        };
        let resolved = resolve(&global, &account);
        assert!(!resolved.extract_pdf);
    }

    #[test]
    fn account_can_disable_what_is_globally_enabled() {
        let global = global_all_enabled();
        let account = AccountOverrides {
            extract_pdf: Some(false),
            ..Default::default()
        };
        let resolved = resolve(&global, &account);
        assert!(!resolved.extract_pdf);
    }

    #[test]
    fn unset_override_falls_back_to_global() {
        let global = global_all_enabled();
        let resolved = resolve(&global, &AccountOverrides::default());
        assert!(resolved.extract_pdf);
        assert!(resolved.extract_word);
        assert!(!resolved.extract_image);
    }

    #[test]
    fn max_attachment_size_takes_the_smaller_value() {
        let global = global_all_enabled();
        let smaller = AccountOverrides {
            max_attachment_size: Some(1_000),
            ..Default::default()
        };
        assert_eq!(resolve(&global, &smaller).max_attachment_size, 1_000);

        let larger = AccountOverrides {
            max_attachment_size: Some(100_000_000),
            ..Default::default()
        };
        assert_eq!(
            resolve(&global, &larger).max_attachment_size,
            global.max_attachment_size
        );
    }

    #[test]
    fn should_extract_text_dispatches_by_family() {
        let policy = resolve(&global_all_enabled(), &AccountOverrides::default());
        assert!(should_extract_text(&policy, "application/pdf"));
        assert!(should_extract_text(
            &policy,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        ));
        assert!(!should_extract_text(&policy, "image/png"));
        assert!(should_extract_text(&policy, "text/plain"));
        assert!(should_extract_text(&policy, "application/rtf"));
        assert!(!should_extract_text(&policy, "application/octet-stream"));
    }
}
