//! Authentication endpoints: registration, password login, silent refresh,
//! identity lookup, and logout.

pub mod password;
pub mod principal;
pub mod session;
pub mod state;
pub mod storage;
pub mod tokens;
pub mod types;
pub mod utils;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Form, Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::error::ApiError;
use self::password::{hash_password, verify_password};
use self::principal::require_auth;
use self::session::{
    clear_session_cookies, extract_cookie, issue_session_cookies, REFRESH_COOKIE_NAME,
};
use self::state::AuthState;
use self::storage::{insert_registered_user, lookup_user_by_email, RegisterOutcome};
use self::tokens::TokenKind;
use self::types::{LoginForm, MeResponse, MessageResponse, RegisterRequest, TokenResponse, UserResponse};
use self::utils::{normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created, session cookies set", body = UserResponse),
        (status = 400, description = "Invalid input or email already registered")
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let login = payload.login.trim().to_string();
    if login.is_empty() {
        return Err(ApiError::Validation("Login must not be empty".to_string()));
    }

    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".to_string()));
    }

    if payload.password.is_empty() {
        return Err(ApiError::Validation(
            "Password must not be empty".to_string(),
        ));
    }

    let password_hash = hash_password(&payload.password)?;

    let user_id = match insert_registered_user(&pool, &login, &email, &password_hash).await? {
        RegisterOutcome::Created(user_id) => user_id,
        RegisterOutcome::EmailTaken => {
            return Err(ApiError::Validation(
                "Email already registered".to_string(),
            ));
        }
    };

    let cookies = issue_session_cookies(&auth_state, Some(&email), user_id)?;
    info!(user_id, "new user registered");

    let body = UserResponse {
        id: user_id,
        login,
        email: Some(email),
    };
    Ok((StatusCode::OK, cookies, Json(body)))
}

#[utoipa::path(
    post,
    path = "/auth/token",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded"
    ),
    responses(
        (status = 200, description = "Login succeeded, session cookies set", body = TokenResponse),
        (status = 401, description = "Incorrect email or password")
    ),
    tag = "auth"
)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Form(payload): Form<LoginForm>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&payload.mail);

    // One failure kind for "no such user" and "wrong password" alike.
    let user = lookup_user_by_email(&pool, &email)
        .await?
        .ok_or(ApiError::AuthenticationFailed)?;
    let stored_hash = user
        .password_hash
        .as_deref()
        .ok_or(ApiError::AuthenticationFailed)?;
    if !verify_password(&payload.password, stored_hash) {
        return Err(ApiError::AuthenticationFailed);
    }

    let cookies = issue_session_cookies(&auth_state, user.email.as_deref(), user.id)?;
    let access_token = auth_state.codec().issue(
        user.email.as_deref(),
        user.id,
        TokenKind::Access,
        auth_state.config().access_ttl_seconds(),
    )?;
    info!(user_id = user.id, "user logged in");

    let body = TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    };
    Ok((StatusCode::OK, cookies, Json(body)))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Access token refreshed", body = MessageResponse),
        (status = 401, description = "Missing, invalid, or expired refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token =
        extract_cookie(&headers, REFRESH_COOKIE_NAME).ok_or(ApiError::NotAuthenticated)?;

    let claims = auth_state.codec().verify(&refresh_token)?;
    if claims.kind != TokenKind::Refresh {
        return Err(ApiError::InvalidToken);
    }

    let config = auth_state.config();
    let new_access = auth_state.codec().issue(
        claims.sub.as_deref(),
        claims.user_id,
        TokenKind::Access,
        config.access_ttl_seconds(),
    )?;
    let mut response_headers = HeaderMap::new();
    response_headers.append(
        axum::http::header::SET_COOKIE,
        session::session_cookie(
            &auth_state,
            session::ACCESS_COOKIE_NAME,
            &new_access,
            config.access_ttl_seconds(),
        )
        .map_err(|err| ApiError::Internal(err.into()))?,
    );
    info!(user_id = claims.user_id, "access token refreshed");

    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new("Access token refreshed")),
    ))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current authenticated identity", body = MeResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    let body = MeResponse {
        user_id: auth.principal.user_id,
        login: auth.principal.login,
        email: auth.principal.email,
    };
    Ok((StatusCode::OK, auth.response_headers, Json(body)))
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session cookies cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn logout(auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    // Clearing cookies is all there is to do; there is no server-side state.
    let headers = clear_session_cookies(&auth_state);
    (
        StatusCode::OK,
        headers,
        Json(MessageResponse::new("Logged out successfully")),
    )
}

/// Issue session cookies for an already-authorized user (pass auto-login).
pub(crate) fn issue_cookies_for(
    auth_state: &AuthState,
    user: &storage::UserRecord,
) -> Result<HeaderMap, ApiError> {
    issue_session_cookies(auth_state, user.email.as_deref(), user.id)
}
