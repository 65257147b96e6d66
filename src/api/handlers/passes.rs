//! Event passes (single-binding admission links).
//!
//! A pass is created unbound with a display name chosen by the event owner.
//! The first person to claim it becomes its permanent holder:
//!
//! - claim as guest: a guest identity is created, bound, and logged in
//! - claim with an account: the pass binds to that account
//!
//! Opening a pass bound to a guest logs the guest straight in. Bound to a
//! registered account, the holder must log in with their password first; a
//! leaked link never silently escalates into someone's real account.
//!
//! Binding is a conditional `UPDATE ... WHERE user_id IS NULL OR user_id =
//! $n`, so two racing claims commit exactly one winner.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, Instrument};
use utoipa::ToSchema;

use super::auth::{
    issue_cookies_for,
    principal::require_auth,
    state::AuthState,
    storage::{fetch_user, insert_guest_user},
    utils::{build_pass_url, generate_link_token, hash_link_token},
};
use super::error::ApiError;
use super::events::storage::fetch_event;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePassRequest {
    pub display_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PassLinkResponse {
    pub link: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PassStateResponse {
    pub status: String,
    pub event_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PassAcceptResponse {
    pub status: String,
}

#[utoipa::path(
    post,
    path = "/passes/personal/{event_id}",
    params(("event_id" = i64, Path, description = "Event id")),
    request_body = CreatePassRequest,
    responses(
        (status = 200, description = "Pass created", body = PassLinkResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Event not found")
    ),
    tag = "passes"
)]
pub async fn create_pass(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CreatePassRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    let display_name = payload.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::Validation(
            "Display name must not be empty".to_string(),
        ));
    }
    if fetch_event(&pool, event_id).await?.is_none() {
        return Err(ApiError::NotFound("Event not found"));
    }

    // The raw token exists only in this response; storage holds the hash.
    let token = generate_link_token()?;
    insert_pass(&pool, event_id, display_name, &hash_link_token(&token)).await?;
    info!(event_id, "event pass created");

    let link = build_pass_url(auth_state.config().frontend_base_url(), &token);
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(PassLinkResponse { link }),
    ))
}

#[utoipa::path(
    get,
    path = "/passes/{token}",
    params(("token" = String, Path, description = "Raw pass token")),
    responses(
        (status = 200, description = "Pass state; a guest-bound pass also sets session cookies", body = PassStateResponse),
        (status = 401, description = "Bound user no longer exists"),
        (status = 404, description = "Unknown pass token")
    ),
    tag = "passes"
)]
pub async fn open_pass(
    Path(token): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let pass = resolve_pass(&pool, &token).await?;

    let Some(user_id) = pass.user_id else {
        return Ok((
            StatusCode::OK,
            HeaderMap::new(),
            Json(PassStateResponse {
                status: "unbound".to_string(),
                event_id: pass.event_id,
                display_name: Some(pass.display_name),
            }),
        ));
    };

    let user = fetch_user(&pool, user_id)
        .await?
        .ok_or(ApiError::NotAuthenticated)?;

    if !user.is_guest {
        // Registered holders authenticate explicitly; the link alone is not a
        // credential for a real account.
        return Ok((
            StatusCode::OK,
            HeaderMap::new(),
            Json(PassStateResponse {
                status: "login_required".to_string(),
                event_id: pass.event_id,
                display_name: None,
            }),
        ));
    }

    let cookies = issue_cookies_for(&auth_state, &user)?;
    info!(user_id, event_id = pass.event_id, "guest logged in via pass");
    Ok((
        StatusCode::OK,
        cookies,
        Json(PassStateResponse {
            status: "logged_in".to_string(),
            event_id: pass.event_id,
            display_name: None,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/passes/{token}/accept-guest",
    params(("token" = String, Path, description = "Raw pass token")),
    responses(
        (status = 200, description = "Guest created (or existing holder logged in); session cookies set", body = PassAcceptResponse),
        (status = 401, description = "Bound user no longer exists"),
        (status = 404, description = "Unknown pass token"),
        (status = 409, description = "Lost a concurrent claim on the pass")
    ),
    tag = "passes"
)]
pub async fn accept_as_guest(
    Path(token): Path<String>,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let pass = resolve_pass(&pool, &token).await?;

    if let Some(user_id) = pass.user_id {
        // Already claimed: log the holder in instead of creating anyone.
        // Registered holders still authenticate with their password; the
        // link never logs into a real account by itself.
        let user = fetch_user(&pool, user_id)
            .await?
            .ok_or(ApiError::NotAuthenticated)?;
        if !user.is_guest {
            return Ok((
                StatusCode::OK,
                HeaderMap::new(),
                Json(PassAcceptResponse {
                    status: "login_required".to_string(),
                }),
            ));
        }
        let cookies = issue_cookies_for(&auth_state, &user)?;
        return Ok((
            StatusCode::OK,
            cookies,
            Json(PassAcceptResponse {
                status: "logged_in".to_string(),
            }),
        ));
    }

    // Guest creation and binding share a transaction: losing the bind race
    // rolls the orphan guest back out.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    let guest_id = insert_guest_user(&mut tx, &pass.display_name).await?;
    match bind_pass(&mut tx, pass.id, guest_id).await? {
        BindOutcome::Bound => {}
        BindOutcome::Conflict => {
            let _ = tx.rollback().await;
            return Err(ApiError::GrantConflict);
        }
    }
    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    let guest = fetch_user(&pool, guest_id)
        .await?
        .ok_or(ApiError::NotAuthenticated)?;
    let cookies = issue_cookies_for(&auth_state, &guest)?;
    info!(
        guest_id,
        event_id = pass.event_id,
        "guest created and bound to pass"
    );
    Ok((
        StatusCode::OK,
        cookies,
        Json(PassAcceptResponse {
            status: "guest_created".to_string(),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/passes/{token}/accept-login",
    params(("token" = String, Path, description = "Raw pass token")),
    responses(
        (status = 200, description = "Pass bound to the current user", body = PassAcceptResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown pass token"),
        (status = 409, description = "Pass already bound to another user")
    ),
    tag = "passes"
)]
pub async fn accept_with_login(
    Path(token): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    let pass = resolve_pass(&pool, &token).await?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    match bind_pass(&mut tx, pass.id, auth.principal.user_id).await? {
        BindOutcome::Bound => {}
        BindOutcome::Conflict => {
            let _ = tx.rollback().await;
            return Err(ApiError::GrantConflict);
        }
    }
    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    info!(
        user_id = auth.principal.user_id,
        event_id = pass.event_id,
        "pass bound to account"
    );
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(PassAcceptResponse {
            status: "linked".to_string(),
        }),
    ))
}

struct PassRow {
    id: i64,
    event_id: i64,
    user_id: Option<i64>,
    display_name: String,
}

/// Binding result. Re-binding to the current holder counts as `Bound`
/// (idempotent); only a different holder is a conflict.
#[derive(Debug, PartialEq, Eq)]
enum BindOutcome {
    Bound,
    Conflict,
}

async fn resolve_pass(pool: &PgPool, token: &str) -> Result<PassRow, ApiError> {
    let token_hash = hash_link_token(token);
    lookup_pass(pool, &token_hash)
        .await?
        .ok_or(ApiError::GrantNotFound)
}

async fn lookup_pass(pool: &PgPool, token_hash: &[u8]) -> Result<Option<PassRow>> {
    let query = r"
        SELECT id, event_id, user_id, display_name
        FROM event_passes
        WHERE token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup pass")?;

    Ok(row.map(|row| PassRow {
        id: row.get("id"),
        event_id: row.get("event_id"),
        user_id: row.get("user_id"),
        display_name: row.get("display_name"),
    }))
}

async fn insert_pass(
    pool: &PgPool,
    event_id: i64,
    display_name: &str,
    token_hash: &[u8],
) -> Result<()> {
    let query = r"
        INSERT INTO event_passes (token_hash, event_id, display_name)
        VALUES ($1, $2, $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(event_id)
        .bind(display_name)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert pass")?;
    Ok(())
}

/// Atomically bind a pass to a user.
///
/// The binding predicate lives in the `UPDATE` itself: of two concurrent
/// claims on an unbound pass, exactly one matches `user_id IS NULL` at commit
/// time. An application-level read-then-write here would only be
/// probabilistically safe.
async fn bind_pass(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    pass_id: i64,
    user_id: i64,
) -> Result<BindOutcome> {
    let query = r"
        UPDATE event_passes
        SET user_id = $2
        WHERE id = $1 AND (user_id IS NULL OR user_id = $2)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(pass_id)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to bind pass")?;

    if result.rows_affected() > 0 {
        Ok(BindOutcome::Bound)
    } else {
        // The pass exists (the caller just resolved it), so zero rows means
        // somebody else holds it.
        Ok(BindOutcome::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use super::BindOutcome;

    #[test]
    fn bind_outcome_debug_names() {
        assert_eq!(format!("{:?}", BindOutcome::Bound), "Bound");
        assert_eq!(format!("{:?}", BindOutcome::Conflict), "Conflict");
    }
}
