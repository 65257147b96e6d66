//! Attendance tracking.
//!
//! One participation row per (user, event), enforced by a unique constraint
//! and a single-statement upsert. Joining an event for the first time with
//! status `going` notifies subscribed participants.

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

use super::auth::{principal::require_auth, state::AuthState};
use super::error::ApiError;
use super::events::storage::fetch_event;
use super::notifications::notify_participant_joined;

const TIME_FORMAT: &str = r#"YYYY-MM-DD"T"HH24:MI:SS"Z""#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStatus {
    Going,
    Maybe,
    NotGoing,
    Invited,
}

impl ParticipationStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Going => "going",
            Self::Maybe => "maybe",
            Self::NotGoing => "not_going",
            Self::Invited => "invited",
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ParticipationCreate {
    pub status: ParticipationStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipationResponse {
    pub id: i64,
    pub user_id: i64,
    pub event_id: i64,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipationStats {
    pub going: i64,
    pub maybe: i64,
    pub not_going: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MyEventResponse {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub time: String,
    pub owner_id: i64,
    pub participation_status: Option<String>,
}

#[utoipa::path(
    post,
    path = "/participations/events/{event_id}",
    params(("event_id" = i64, Path, description = "Event id")),
    request_body = ParticipationCreate,
    responses(
        (status = 200, description = "Participation stored", body = ParticipationResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "Event not found")
    ),
    tag = "participations"
)]
pub async fn set_participation_status(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<ParticipationCreate>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    if fetch_event(&pool, event_id).await?.is_none() {
        return Err(ApiError::NotFound("Event not found"));
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    let (participation, inserted) =
        upsert_participation(&mut tx, auth.principal.user_id, event_id, payload.status).await?;
    if inserted && payload.status == ParticipationStatus::Going {
        notify_participant_joined(&mut tx, event_id, auth.principal.user_id).await?;
    }
    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    info!(
        user_id = auth.principal.user_id,
        event_id,
        status = payload.status.as_str(),
        "participation stored"
    );
    Ok((StatusCode::OK, auth.response_headers, Json(participation)))
}

#[utoipa::path(
    get,
    path = "/participations/events/{event_id}/stats",
    params(("event_id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Attendance counts", body = ParticipationStats)
    ),
    tag = "participations"
)]
pub async fn read_participation_stats(
    Path(event_id): Path<i64>,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = participation_stats(&pool, event_id).await?;
    Ok((StatusCode::OK, Json(stats)))
}

#[utoipa::path(
    get,
    path = "/participations/me/events",
    responses(
        (status = 200, description = "Events the user owns or participates in", body = [MyEventResponse]),
        (status = 401, description = "Not authenticated")
    ),
    tag = "participations"
)]
pub async fn read_my_events(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;
    let events = my_events(&pool, auth.principal.user_id).await?;
    Ok((StatusCode::OK, auth.response_headers, Json(events)))
}

/// Record a user joining an event through an invitation, with the
/// `participant_joined` notification on first join.
pub(crate) async fn join_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: i64,
    event_id: i64,
) -> Result<()> {
    let (_, inserted) =
        upsert_participation(tx, user_id, event_id, ParticipationStatus::Going).await?;
    if inserted {
        notify_participant_joined(tx, event_id, user_id).await?;
    }
    Ok(())
}

async fn upsert_participation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: i64,
    event_id: i64,
    status: ParticipationStatus,
) -> Result<(ParticipationResponse, bool)> {
    // `created_at = updated_at` distinguishes a fresh insert from an update:
    // both default to the same transaction timestamp on insert, while an
    // update only touches `updated_at`.
    let query = format!(
        r#"
        INSERT INTO event_participations (user_id, event_id, status)
        VALUES ($1, $2, $3)
        ON CONFLICT ON CONSTRAINT event_participations_user_event
        DO UPDATE SET status = EXCLUDED.status, updated_at = NOW()
        RETURNING id, user_id, event_id, status,
            to_char(created_at AT TIME ZONE 'utc', '{TIME_FORMAT}') AS created_at,
            to_char(updated_at AT TIME ZONE 'utc', '{TIME_FORMAT}') AS updated_at,
            (created_at = updated_at) AS inserted
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .bind(event_id)
        .bind(status.as_str())
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to upsert participation")?;

    let inserted: bool = row.get("inserted");
    Ok((
        ParticipationResponse {
            id: row.get("id"),
            user_id: row.get("user_id"),
            event_id: row.get("event_id"),
            status: row.get("status"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        },
        inserted,
    ))
}

async fn participation_stats(pool: &PgPool, event_id: i64) -> Result<ParticipationStats> {
    let query = r"
        SELECT status, COUNT(*) AS count
        FROM event_participations
        WHERE event_id = $1
        GROUP BY status
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(event_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to aggregate participation stats")?;

    let mut stats = ParticipationStats {
        going: 0,
        maybe: 0,
        not_going: 0,
    };
    for row in rows {
        let status: String = row.get("status");
        let count: i64 = row.get("count");
        match status.as_str() {
            "going" => stats.going = count,
            "maybe" => stats.maybe = count,
            "not_going" => stats.not_going = count,
            _ => {}
        }
    }
    Ok(stats)
}

async fn my_events(pool: &PgPool, user_id: i64) -> Result<Vec<MyEventResponse>> {
    let query = format!(
        r#"
        SELECT events.id, events.name, events.location,
            to_char(events.time AT TIME ZONE 'utc', '{TIME_FORMAT}') AS time,
            events.owner_id,
            event_participations.status AS participation_status
        FROM events
        LEFT JOIN event_participations
            ON event_participations.event_id = events.id
            AND event_participations.user_id = $1
        WHERE events.owner_id = $1 OR event_participations.user_id IS NOT NULL
        ORDER BY events.time ASC
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list user events")?;

    Ok(rows
        .into_iter()
        .map(|row| MyEventResponse {
            id: row.get("id"),
            name: row.get("name"),
            location: row.get("location"),
            time: row.get("time"),
            owner_id: row.get("owner_id"),
            participation_status: row.get("participation_status"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(ParticipationStatus::Going.as_str(), "going");
        assert_eq!(ParticipationStatus::Maybe.as_str(), "maybe");
        assert_eq!(ParticipationStatus::NotGoing.as_str(), "not_going");
        assert_eq!(ParticipationStatus::Invited.as_str(), "invited");
    }

    #[test]
    fn serde_names_match_sql_names() {
        for status in [
            ParticipationStatus::Going,
            ParticipationStatus::Maybe,
            ParticipationStatus::NotGoing,
            ParticipationStatus::Invited,
        ] {
            let encoded = serde_json::to_string(&status).expect("should serialize");
            assert_eq!(encoded, format!("\"{}\"", status.as_str()));
        }
    }

    #[test]
    fn unknown_status_rejected() {
        let parsed: Result<ParticipationCreate, _> =
            serde_json::from_str(r#"{"status": "attending"}"#);
        assert!(parsed.is_err());
    }
}
