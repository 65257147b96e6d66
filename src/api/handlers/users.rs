//! User listing, password change, and account deletion.
//!
//! Password change and deletion are strictly self-service; acting on another
//! user's id is an ownership violation regardless of what else is true.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use utoipa::ToSchema;

use super::auth::{
    password::{hash_password, verify_password},
    principal::require_auth,
    state::AuthState,
    storage::fetch_user,
    types::UserResponse,
};
use super::error::ApiError;
use super::events::types::OkResponse;

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
    pub new_password_confirm: String,
}

#[utoipa::path(
    get,
    path = "/users/",
    responses(
        (status = 200, description = "All users", body = [UserResponse])
    ),
    tag = "users"
)]
pub async fn read_users(pool: Extension<PgPool>) -> Result<impl IntoResponse, ApiError> {
    let users = list_users(&pool).await?;
    info!(count = users.len(), "users listed");
    Ok((StatusCode::OK, Json(users)))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User details", body = UserResponse),
        (status = 404, description = "User not found")
    ),
    tag = "users"
)]
pub async fn read_user(
    Path(user_id): Path<i64>,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse, ApiError> {
    let user = fetch_user(&pool, user_id)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    Ok((
        StatusCode::OK,
        Json(UserResponse {
            id: user.id,
            login: user.login,
            email: user.email,
        }),
    ))
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/password",
    params(("user_id" = i64, Path, description = "User id")),
    request_body = PasswordChange,
    responses(
        (status = 200, description = "Password changed", body = OkResponse),
        (status = 400, description = "Current password wrong or confirmation mismatch"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Can only change your own password")
    ),
    tag = "users"
)]
pub async fn update_password(
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<PasswordChange>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    if auth.principal.user_id != user_id {
        return Err(ApiError::OwnershipViolation(
            "You can change only your own password",
        ));
    }

    // One generic failure message for every reason, as for login.
    let failure =
        || ApiError::Validation("Password change failed: current password may be incorrect or new passwords do not match".to_string());

    if payload.new_password.is_empty() || payload.new_password != payload.new_password_confirm {
        warn!(user_id, "password change rejected");
        return Err(failure());
    }

    let user = fetch_user(&pool, user_id)
        .await?
        .ok_or(ApiError::NotFound("User not found"))?;
    let Some(stored_hash) = user.password_hash.as_deref() else {
        // Guests have no password to change.
        warn!(user_id, "password change rejected");
        return Err(failure());
    };
    if !verify_password(&payload.current_password, stored_hash) {
        warn!(user_id, "password change rejected");
        return Err(failure());
    }

    let new_hash = hash_password(&payload.new_password)?;
    store_password_hash(&pool, user_id, &new_hash).await?;
    info!(user_id, "password changed");
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(OkResponse { ok: true }),
    ))
}

#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Account deleted", body = OkResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Can only delete your own account"),
        (status = 404, description = "User not found")
    ),
    tag = "users"
)]
pub async fn remove_user(
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    if auth.principal.user_id != user_id {
        return Err(ApiError::OwnershipViolation(
            "You can delete only your own account",
        ));
    }

    if !delete_user(&pool, user_id).await? {
        return Err(ApiError::NotFound("User not found"));
    }
    info!(user_id, "account deleted");
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(OkResponse { ok: true }),
    ))
}

async fn list_users(pool: &PgPool) -> Result<Vec<UserResponse>> {
    let query = "SELECT id, login, email FROM users ORDER BY id";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list users")?;

    Ok(rows
        .into_iter()
        .map(|row| UserResponse {
            id: row.get("id"),
            login: row.get("login"),
            email: row.get("email"),
        })
        .collect())
}

async fn store_password_hash(pool: &PgPool, user_id: i64, password_hash: &str) -> Result<()> {
    let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store password hash")?;
    Ok(())
}

async fn delete_user(pool: &PgPool, user_id: i64) -> Result<bool> {
    let query = "DELETE FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user")?;
    Ok(result.rows_affected() > 0)
}
