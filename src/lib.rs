//! # Tessera (Event Planning & Guest Admission)
//!
//! `tessera` is the backend for an event-management application. Users create
//! events, admit participants, comment, track attendance, and receive email
//! notifications.
//!
//! ## Identity Model (Accounts and Guests)
//!
//! A registered account has a unique email and an argon2 password hash. A
//! guest account has neither; guests come into existence when someone claims
//! an event pass and exist only to attend that event.
//!
//! ## Sessions (Stateless Two-Token Cookies)
//!
//! Authentication issues a short-lived **access token** and a longer-lived
//! **refresh token**, both HMAC-signed claim sets delivered as `HttpOnly`
//! cookies. Nothing is stored server side: when the access token lapses, a
//! valid refresh cookie silently mints a replacement. Logout clears the
//! cookies; there is no revocation list, which trades early invalidation for
//! a session store-free deployment.
//!
//! ## Admission Links (Passes and Invitations)
//!
//! - **Passes** are single-binding: exactly one person may ever claim one.
//!   Binding is an atomic conditional update, so two racing claims resolve to
//!   one winner and one `409`.
//! - **Invitations** are reusable: any number of account holders may accept
//!   the same link, each producing their own participation row.
//!
//! Only the SHA-256 hash of a link token is stored; a database leak does not
//! leak working links.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
