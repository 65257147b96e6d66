//! Event invitations (reusable admission links).
//!
//! Unlike a pass, an invitation has no holder: any number of account holders
//! may accept the same link. Accepting records a participation row for the
//! accepting user and leaves the invitation untouched.

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
    principal::require_auth,
    state::AuthState,
    utils::{build_invite_url, generate_link_token, hash_link_token},
};
use super::error::ApiError;
use super::events::storage::fetch_event;
use super::participations::join_event;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateInviteRequest {
    pub event_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteLinkResponse {
    pub link: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteStateResponse {
    pub event_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteAcceptResponse {
    pub status: String,
    pub event_id: i64,
}

#[utoipa::path(
    post,
    path = "/invites/",
    request_body = CreateInviteRequest,
    responses(
        (status = 200, description = "Invitation created", body = InviteLinkResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Event not found")
    ),
    tag = "invites"
)]
pub async fn create_invite(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CreateInviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    if fetch_event(&pool, payload.event_id).await?.is_none() {
        return Err(ApiError::NotFound("Event not found"));
    }

    let token = generate_link_token()?;
    insert_invitation(&pool, payload.event_id, &hash_link_token(&token)).await?;
    info!(event_id = payload.event_id, "invitation link created");

    let link = build_invite_url(auth_state.config().frontend_base_url(), &token);
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(InviteLinkResponse { link }),
    ))
}

#[utoipa::path(
    get,
    path = "/invites/{token}",
    params(("token" = String, Path, description = "Raw invitation token")),
    responses(
        (status = 200, description = "Invitation details", body = InviteStateResponse),
        (status = 404, description = "Unknown invitation token")
    ),
    tag = "invites"
)]
pub async fn open_invite(
    Path(token): Path<String>,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse, ApiError> {
    let invitation = resolve_invitation(&pool, &token).await?;
    Ok((
        StatusCode::OK,
        Json(InviteStateResponse {
            event_id: invitation.event_id,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/invites/{token}/accept",
    params(("token" = String, Path, description = "Raw invitation token")),
    responses(
        (status = 200, description = "Joined the event", body = InviteAcceptResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Unknown invitation token")
    ),
    tag = "invites"
)]
pub async fn accept_invite(
    Path(token): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    let invitation = resolve_invitation(&pool, &token).await?;

    // Acceptance never mutates the invitation; it stays valid for others.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    join_event(&mut tx, auth.principal.user_id, invitation.event_id).await?;
    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    info!(
        user_id = auth.principal.user_id,
        event_id = invitation.event_id,
        "invitation accepted"
    );
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(InviteAcceptResponse {
            status: "accepted".to_string(),
            event_id: invitation.event_id,
        }),
    ))
}

struct InvitationRow {
    event_id: i64,
}

async fn resolve_invitation(pool: &PgPool, token: &str) -> Result<InvitationRow, ApiError> {
    let token_hash = hash_link_token(token);
    lookup_invitation(pool, &token_hash)
        .await?
        .ok_or(ApiError::GrantNotFound)
}

async fn lookup_invitation(pool: &PgPool, token_hash: &[u8]) -> Result<Option<InvitationRow>> {
    let query = "SELECT event_id FROM event_invitations WHERE token_hash = $1";
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
        .context("failed to lookup invitation")?;

    Ok(row.map(|row| InvitationRow {
        event_id: row.get("event_id"),
    }))
}

async fn insert_invitation(pool: &PgPool, event_id: i64, token_hash: &[u8]) -> Result<()> {
    let query = r"
        INSERT INTO event_invitations (token_hash, event_id)
        VALUES ($1, $2)
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
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert invitation")?;
    Ok(())
}
