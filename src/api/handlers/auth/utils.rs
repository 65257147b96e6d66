//! Small helpers for input validation and opaque link tokens.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Create a new opaque token for a pass or invitation link.
///
/// The raw value goes into the shared link only; the database stores a hash.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub(crate) fn generate_link_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate link token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a link token so raw values never touch the database.
/// The hash is the only lookup key when a link is opened.
pub(crate) fn hash_link_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Frontend URL a pass token is delivered as.
pub(crate) fn build_pass_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/pass/{token}")
}

/// Frontend URL an invitation token is delivered as.
pub(crate) fn build_invite_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/invite/{token}")
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Ann@Example.COM "), "ann@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@x.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn link_tokens_carry_32_bytes_of_entropy() {
        let decoded_len = generate_link_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn link_tokens_are_unique() {
        let first = generate_link_token().expect("token generation should succeed");
        let second = generate_link_token().expect("token generation should succeed");
        assert_ne!(first, second);
    }

    #[test]
    fn hash_link_token_stable() {
        let first = hash_link_token("token");
        let second = hash_link_token("token");
        let different = hash_link_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn link_urls_trim_trailing_slash() {
        assert_eq!(
            build_pass_url("https://events.example.com/", "tok"),
            "https://events.example.com/pass/tok"
        );
        assert_eq!(
            build_invite_url("https://events.example.com", "tok"),
            "https://events.example.com/invite/tok"
        );
    }
}
