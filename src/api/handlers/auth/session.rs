//! Cookie lifecycle for the two-token session protocol.
//!
//! Login sets an access cookie (minutes) and a refresh cookie (days). When a
//! request arrives without a verifying access cookie, a verifying refresh
//! cookie silently mints a replacement access token on the response. Logout
//! clears both cookies; nothing is stored server side.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};

use super::super::error::ApiError;
use super::state::AuthState;
use super::tokens::{Claims, TokenKind};

pub(crate) const ACCESS_COOKIE_NAME: &str = "access_token";
pub(crate) const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Issue both session tokens for a user and return the `Set-Cookie` headers.
pub(crate) fn issue_session_cookies(
    auth_state: &AuthState,
    email: Option<&str>,
    user_id: i64,
) -> Result<HeaderMap, ApiError> {
    let config = auth_state.config();
    let access = auth_state.codec().issue(
        email,
        user_id,
        TokenKind::Access,
        config.access_ttl_seconds(),
    )?;
    let refresh = auth_state.codec().issue(
        email,
        user_id,
        TokenKind::Refresh,
        config.refresh_ttl_seconds(),
    )?;

    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        session_cookie(
            auth_state,
            ACCESS_COOKIE_NAME,
            &access,
            config.access_ttl_seconds(),
        )
        .map_err(|err| ApiError::Internal(err.into()))?,
    );
    headers.append(
        SET_COOKIE,
        session_cookie(
            auth_state,
            REFRESH_COOKIE_NAME,
            &refresh,
            config.refresh_ttl_seconds(),
        )
        .map_err(|err| ApiError::Internal(err.into()))?,
    );
    Ok(headers)
}

/// Clear both session cookies. Idempotent by construction.
pub(crate) fn clear_session_cookies(auth_state: &AuthState) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME] {
        if let Ok(cookie) = session_cookie(auth_state, name, "", 0) {
            headers.append(SET_COOKIE, cookie);
        }
    }
    headers
}

/// Resolved session claims plus any headers the response must carry
/// (a silently refreshed access cookie).
pub(crate) struct ResolvedSession {
    pub(crate) claims: Claims,
    pub(crate) response_headers: HeaderMap,
}

/// Resolve the current session from request cookies.
///
/// Access cookie verifies: resolve directly. Otherwise a verifying refresh
/// cookie mints a replacement access token, set on `response_headers`.
///
/// # Errors
/// [`ApiError::NotAuthenticated`] when no cookie is usable at all;
/// [`ApiError::InvalidToken`] when a refresh cookie is present but fails
/// verification (or is not a refresh token).
pub(crate) fn resolve_session(
    auth_state: &AuthState,
    headers: &HeaderMap,
) -> Result<ResolvedSession, ApiError> {
    let access_claims = extract_cookie(headers, ACCESS_COOKIE_NAME)
        .and_then(|token| auth_state.codec().verify(&token).ok())
        .filter(|claims| claims.kind == TokenKind::Access);

    if let Some(claims) = access_claims {
        return Ok(ResolvedSession {
            claims,
            response_headers: HeaderMap::new(),
        });
    }

    let Some(refresh_token) = extract_cookie(headers, REFRESH_COOKIE_NAME) else {
        return Err(ApiError::NotAuthenticated);
    };

    let refresh_claims = auth_state.codec().verify(&refresh_token)?;
    if refresh_claims.kind != TokenKind::Refresh {
        return Err(ApiError::InvalidToken);
    }

    let config = auth_state.config();
    let new_access = auth_state.codec().issue(
        refresh_claims.sub.as_deref(),
        refresh_claims.user_id,
        TokenKind::Access,
        config.access_ttl_seconds(),
    )?;
    let mut response_headers = HeaderMap::new();
    response_headers.append(
        SET_COOKIE,
        session_cookie(
            auth_state,
            ACCESS_COOKIE_NAME,
            &new_access,
            config.access_ttl_seconds(),
        )
        .map_err(|err| ApiError::Internal(err.into()))?,
    );

    let claims = auth_state.codec().verify(&new_access)?;
    Ok(ResolvedSession {
        claims,
        response_headers,
    })
}

/// Build an `HttpOnly` session cookie. `max_age` of zero clears the cookie.
pub(super) fn session_cookie(
    auth_state: &AuthState,
    name: &str,
    token: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}
