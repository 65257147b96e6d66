//! Event comments: add and paginated listing.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, Instrument};
use utoipa::{IntoParams, ToSchema};

use super::auth::{principal::require_auth, state::AuthState};
use super::error::ApiError;
use super::events::storage::fetch_event;

const TIME_FORMAT: &str = r#"YYYY-MM-DD"T"HH24:MI:SS"Z""#;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentCreate {
    pub content: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommentRead {
    pub id: i64,
    pub user_login: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CommentPage {
    /// Page size, clamped to 1..=100.
    pub limit: Option<i64>,
    /// Rows to skip.
    pub offset: Option<i64>,
}

#[utoipa::path(
    post,
    path = "/events/{event_id}/comments",
    params(("event_id" = i64, Path, description = "Event id")),
    request_body = CommentCreate,
    responses(
        (status = 200, description = "Comment created", body = CommentRead),
        (status = 400, description = "Empty comment"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Event not found")
    ),
    tag = "comments"
)]
pub async fn add_comment(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CommentCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    let content = payload.content.trim();
    if content.is_empty() {
        return Err(ApiError::Validation(
            "Comment must not be empty".to_string(),
        ));
    }
    if fetch_event(&pool, event_id).await?.is_none() {
        return Err(ApiError::NotFound("Event not found"));
    }

    let comment = insert_comment(&pool, event_id, auth.principal.user_id, content).await?;
    info!(
        user_id = auth.principal.user_id,
        event_id,
        comment_id = comment.id,
        "comment added"
    );
    Ok((StatusCode::OK, auth.response_headers, Json(comment)))
}

#[utoipa::path(
    get,
    path = "/events/{event_id}/comments",
    params(
        ("event_id" = i64, Path, description = "Event id"),
        CommentPage
    ),
    responses(
        (status = 200, description = "Comments, newest first", body = [CommentRead])
    ),
    tag = "comments"
)]
pub async fn read_comments(
    Path(event_id): Path<i64>,
    Query(page): Query<CommentPage>,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse, ApiError> {
    let (limit, offset) = clamp_page(&page);
    let comments = list_comments(&pool, event_id, limit, offset).await?;
    Ok((StatusCode::OK, Json(comments)))
}

fn clamp_page(page: &CommentPage) -> (i64, i64) {
    let limit = page
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = page.offset.unwrap_or(0).max(0);
    (limit, offset)
}

async fn insert_comment(
    pool: &PgPool,
    event_id: i64,
    user_id: i64,
    content: &str,
) -> Result<CommentRead> {
    let query = format!(
        r#"
        INSERT INTO comments (event_id, user_id, content)
        VALUES ($1, $2, $3)
        RETURNING id,
            (SELECT login FROM users WHERE id = $2) AS user_login,
            content,
            to_char(created_at AT TIME ZONE 'utc', '{TIME_FORMAT}') AS created_at
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(event_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to insert comment")?;

    Ok(CommentRead {
        id: row.get("id"),
        user_login: row.get("user_login"),
        content: row.get("content"),
        created_at: row.get("created_at"),
    })
}

async fn list_comments(
    pool: &PgPool,
    event_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<CommentRead>> {
    let query = format!(
        r#"
        SELECT comments.id, users.login AS user_login, comments.content,
            to_char(comments.created_at AT TIME ZONE 'utc', '{TIME_FORMAT}') AS created_at
        FROM comments
        JOIN users ON users.id = comments.user_id
        WHERE comments.event_id = $1
        ORDER BY comments.created_at DESC
        LIMIT $2 OFFSET $3
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(event_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list comments")?;

    Ok(rows
        .into_iter()
        .map(|row| CommentRead {
            id: row.get("id"),
            user_login: row.get("user_login"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        })
        .collect())
}
