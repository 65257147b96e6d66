//! Authenticated principal extraction.
//!
//! Flow Overview: resolve the session cookies to claims, load the user row,
//! and hand downstream handlers a principal plus any `Set-Cookie` headers a
//! silent access refresh produced. Handlers must merge those headers into
//! their response or the renewed cookie is lost.

use axum::http::HeaderMap;
use sqlx::PgPool;

use super::super::error::ApiError;
use super::session::resolve_session;
use super::state::AuthState;
use super::storage::fetch_user;

/// Authenticated user context derived from the session cookies.
#[derive(Clone, Debug)]
pub(crate) struct Principal {
    pub(crate) user_id: i64,
    pub(crate) login: String,
    pub(crate) email: Option<String>,
    pub(crate) is_guest: bool,
}

/// A resolved principal plus response headers to carry forward.
pub(crate) struct AuthSession {
    pub(crate) principal: Principal,
    pub(crate) response_headers: HeaderMap,
}

/// Resolve the session cookies into a principal, or fail with the
/// appropriate unauthorized kind.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<AuthSession, ApiError> {
    let resolved = resolve_session(auth_state, headers)?;

    // The claims may outlive the row (deleted account); treat that as no
    // authentication rather than a server error.
    let Some(user) = fetch_user(pool, resolved.claims.user_id).await? else {
        return Err(ApiError::NotAuthenticated);
    };

    Ok(AuthSession {
        principal: Principal {
            user_id: user.id,
            login: user.login,
            email: user.email,
            is_guest: user.is_guest,
        },
        response_headers: resolved.response_headers,
    })
}
