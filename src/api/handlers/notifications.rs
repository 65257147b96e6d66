//! Notification preferences and outbox fan-out.
//!
//! Preferences are per (user, event, type, channel); a missing row means
//! opted out. Fan-out collects subscribed recipients and enqueues one outbox
//! row each, inside the transaction of the mutation that triggered the
//! notification, so no email can exist for an uncommitted change.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{info, Instrument};
use utoipa::ToSchema;

use super::auth::{principal::require_auth, state::AuthState};
use super::error::ApiError;
use crate::api::email::enqueue_email;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    EventUpdated,
    ParticipantJoined,
}

impl NotificationType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::EventUpdated => "event_updated",
            Self::ParticipantJoined => "participant_joined",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
}

impl NotificationChannel {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
        }
    }
}

const fn default_subscribed() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PreferenceCreate {
    pub notification_type: NotificationType,
    pub channel: NotificationChannel,
    #[serde(default = "default_subscribed")]
    pub subscribed: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PreferenceBulkUpdate {
    pub preferences: Vec<PreferenceCreate>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PreferenceResponse {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub notification_type: String,
    pub channel: String,
    pub subscribed: bool,
}

#[utoipa::path(
    get,
    path = "/notifications/events/{event_id}/preferences",
    params(("event_id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Preferences for the current user", body = [PreferenceResponse]),
        (status = 401, description = "Not authenticated")
    ),
    tag = "notifications"
)]
pub async fn get_preferences(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    let preferences = list_preferences(&pool, auth.principal.user_id, event_id).await?;
    Ok((StatusCode::OK, auth.response_headers, Json(preferences)))
}

#[utoipa::path(
    post,
    path = "/notifications/events/{event_id}/preferences",
    params(("event_id" = i64, Path, description = "Event id")),
    request_body = PreferenceCreate,
    responses(
        (status = 200, description = "Preference stored", body = PreferenceResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Guests cannot subscribe")
    ),
    tag = "notifications"
)]
pub async fn set_preference(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<PreferenceCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    if auth.principal.is_guest {
        return Err(ApiError::OwnershipViolation(
            "Guest users cannot receive notifications",
        ));
    }

    let preference = upsert_preference(
        &pool,
        auth.principal.user_id,
        event_id,
        payload.notification_type,
        payload.channel,
        payload.subscribed,
    )
    .await?;
    info!(
        user_id = auth.principal.user_id,
        event_id, "notification preference stored"
    );
    Ok((StatusCode::OK, auth.response_headers, Json(preference)))
}

#[utoipa::path(
    put,
    path = "/notifications/events/{event_id}/preferences",
    params(("event_id" = i64, Path, description = "Event id")),
    request_body = PreferenceBulkUpdate,
    responses(
        (status = 200, description = "Preferences stored", body = [PreferenceResponse]),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Guests cannot subscribe")
    ),
    tag = "notifications"
)]
pub async fn bulk_update_preferences(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<PreferenceBulkUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    if auth.principal.is_guest {
        return Err(ApiError::OwnershipViolation(
            "Guest users cannot receive notifications",
        ));
    }

    let mut results = Vec::with_capacity(payload.preferences.len());
    for preference in payload.preferences {
        results.push(
            upsert_preference(
                &pool,
                auth.principal.user_id,
                event_id,
                preference.notification_type,
                preference.channel,
                preference.subscribed,
            )
            .await?,
        );
    }
    info!(
        user_id = auth.principal.user_id,
        event_id,
        count = results.len(),
        "notification preferences stored"
    );
    Ok((StatusCode::OK, auth.response_headers, Json(results)))
}

async fn upsert_preference(
    pool: &PgPool,
    user_id: i64,
    event_id: i64,
    notification_type: NotificationType,
    channel: NotificationChannel,
    subscribed: bool,
) -> Result<PreferenceResponse> {
    // Uniqueness on the 4-tuple makes the upsert a single statement.
    let query = r"
        INSERT INTO notification_preferences
            (user_id, event_id, notification_type, channel, subscribed)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT ON CONSTRAINT notification_preferences_tuple
        DO UPDATE SET subscribed = EXCLUDED.subscribed
        RETURNING id, user_id, event_id, notification_type, channel, subscribed
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(event_id)
        .bind(notification_type.as_str())
        .bind(channel.as_str())
        .bind(subscribed)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to upsert notification preference")?;

    Ok(PreferenceResponse {
        id: row.get("id"),
        user_id: row.get("user_id"),
        event_id: row.get("event_id"),
        notification_type: row.get("notification_type"),
        channel: row.get("channel"),
        subscribed: row.get("subscribed"),
    })
}

async fn list_preferences(
    pool: &PgPool,
    user_id: i64,
    event_id: i64,
) -> Result<Vec<PreferenceResponse>> {
    let query = r"
        SELECT id, user_id, event_id, notification_type, channel, subscribed
        FROM notification_preferences
        WHERE user_id = $1 AND event_id = $2
        ORDER BY id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .bind(event_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list notification preferences")?;

    Ok(rows
        .into_iter()
        .map(|row| PreferenceResponse {
            id: row.get("id"),
            user_id: row.get("user_id"),
            event_id: row.get("event_id"),
            notification_type: row.get("notification_type"),
            channel: row.get("channel"),
            subscribed: row.get("subscribed"),
        })
        .collect())
}

struct Recipient {
    email: String,
    login: String,
}

/// Subscribed email recipients for an event, optionally excluding the actor.
async fn subscriber_recipients(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i64,
    notification_type: NotificationType,
    exclude_user: Option<i64>,
) -> Result<Vec<Recipient>> {
    let query = r"
        SELECT users.email, users.login
        FROM notification_preferences
        JOIN users ON users.id = notification_preferences.user_id
        WHERE notification_preferences.event_id = $1
          AND notification_preferences.notification_type = $2
          AND notification_preferences.channel = 'email'
          AND notification_preferences.subscribed
          AND users.email IS NOT NULL
          AND ($3::bigint IS NULL OR users.id <> $3)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(event_id)
        .bind(notification_type.as_str())
        .bind(exclude_user)
        .fetch_all(&mut **tx)
        .instrument(span)
        .await
        .context("failed to collect notification subscribers")?;

    Ok(rows
        .into_iter()
        .map(|row| Recipient {
            email: row.get("email"),
            login: row.get("login"),
        })
        .collect())
}

/// Queue `event_updated` emails for everyone subscribed to the event.
pub(crate) async fn notify_event_updated(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i64,
    event_name: &str,
    changes: &Map<String, Value>,
) -> Result<()> {
    let recipients =
        subscriber_recipients(tx, event_id, NotificationType::EventUpdated, None).await?;
    if recipients.is_empty() {
        return Ok(());
    }

    info!(
        event_id,
        count = recipients.len(),
        "queueing event_updated notifications"
    );
    for recipient in recipients {
        let payload = json!({
            "login": recipient.login,
            "event_name": event_name,
            "notification_type": NotificationType::EventUpdated.as_str(),
            "changes": changes,
        });
        enqueue_email(tx, &recipient.email, "event_updated", &payload).await?;
    }
    Ok(())
}

/// Queue `participant_joined` emails, excluding the participant themselves.
pub(crate) async fn notify_participant_joined(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i64,
    new_participant_id: i64,
) -> Result<()> {
    let recipients = subscriber_recipients(
        tx,
        event_id,
        NotificationType::ParticipantJoined,
        Some(new_participant_id),
    )
    .await?;
    if recipients.is_empty() {
        return Ok(());
    }

    let event_name = fetch_text(tx, "SELECT name FROM events WHERE id = $1", event_id)
        .await?
        .unwrap_or_default();
    let participant_name = fetch_text(tx, "SELECT login FROM users WHERE id = $1", new_participant_id)
        .await?
        .unwrap_or_default();

    info!(
        event_id,
        count = recipients.len(),
        "queueing participant_joined notifications"
    );
    for recipient in recipients {
        let payload = json!({
            "login": recipient.login,
            "event_name": event_name,
            "notification_type": NotificationType::ParticipantJoined.as_str(),
            "new_participant_name": participant_name,
        });
        enqueue_email(tx, &recipient.email, "participant_joined", &payload).await?;
    }
    Ok(())
}

async fn fetch_text(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    query: &str,
    id: i64,
) -> Result<Option<String>> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to fetch notification context")?;
    Ok(row.map(|row| row.get(0)))
}
