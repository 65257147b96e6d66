//! Event CRUD endpoints.
//!
//! Reads are public; writes require a session and, for update/delete,
//! ownership of the event. An update notifies subscribed participants.

pub mod storage;
pub mod types;

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine;
use regex::Regex;
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::auth::{principal::require_auth, state::AuthState};
use super::error::ApiError;
use super::notifications::notify_event_updated;
use self::storage::{
    delete_event, fetch_event, insert_event, list_events, update_event, DeleteOutcome, EventRow,
    UpdateOutcome,
};
use self::types::{EventCreateRequest, EventResponse, EventUpdateRequest, OkResponse};

fn event_response(row: EventRow) -> EventResponse {
    EventResponse {
        id: row.id,
        name: row.name,
        location: row.location,
        photo: row
            .photo
            .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes)),
        time: row.time,
        description: row.description,
        owner_id: row.owner_id,
    }
}

fn decode_photo(photo: Option<&str>) -> Result<Option<Vec<u8>>, ApiError> {
    match photo {
        None => Ok(None),
        Some(encoded) => base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map(Some)
            .map_err(|_| ApiError::Validation("Photo must be base64".to_string())),
    }
}

/// Accepts ISO-8601 date or date-time strings; the database does the real
/// parsing, this only keeps garbage from reaching it.
fn valid_timestamp(value: &str) -> bool {
    Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2})?(\.\d+)?(Z|[+-]\d{2}:?\d{2})?)?$")
        .is_ok_and(|regex| regex.is_match(value.trim()))
}

#[utoipa::path(
    post,
    path = "/events/",
    request_body = EventCreateRequest,
    responses(
        (status = 200, description = "Event created", body = EventResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "events"
)]
pub async fn add_event(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<EventCreateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Name must not be empty".to_string()));
    }
    if !valid_timestamp(&payload.time) {
        return Err(ApiError::Validation("Invalid event time".to_string()));
    }
    let photo = decode_photo(payload.photo.as_deref())?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    let row = insert_event(
        &mut tx,
        name,
        payload.location.trim(),
        photo.as_deref(),
        payload.time.trim(),
        payload.description.as_deref(),
        auth.principal.user_id,
    )
    .await?;
    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    info!(event_id = row.id, owner_id = row.owner_id, "event created");
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(event_response(row)),
    ))
}

#[utoipa::path(
    get,
    path = "/events/",
    responses(
        (status = 200, description = "All events", body = [EventResponse])
    ),
    tag = "events"
)]
pub async fn read_events(pool: Extension<PgPool>) -> Result<impl IntoResponse, ApiError> {
    let events = list_events(&pool)
        .await?
        .into_iter()
        .map(event_response)
        .collect::<Vec<_>>();
    Ok((StatusCode::OK, Json(events)))
}

#[utoipa::path(
    get,
    path = "/events/{event_id}",
    params(("event_id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event details", body = EventResponse),
        (status = 404, description = "Event not found")
    ),
    tag = "events"
)]
pub async fn read_event(
    Path(event_id): Path<i64>,
    pool: Extension<PgPool>,
) -> Result<impl IntoResponse, ApiError> {
    let event = fetch_event(&pool, event_id)
        .await?
        .ok_or(ApiError::NotFound("Event not found"))?;
    Ok((StatusCode::OK, Json(event_response(event))))
}

#[utoipa::path(
    put,
    path = "/events/{event_id}",
    params(("event_id" = i64, Path, description = "Event id")),
    request_body = EventUpdateRequest,
    responses(
        (status = 200, description = "Event updated", body = EventResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Event not found")
    ),
    tag = "events"
)]
pub async fn edit_event(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<EventUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    if let Some(time) = &payload.time {
        if !valid_timestamp(time) {
            return Err(ApiError::Validation("Invalid event time".to_string()));
        }
    }
    let photo = decode_photo(payload.photo.as_deref())?;
    let changes = changed_fields(&payload);

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;
    let outcome = update_event(
        &mut tx,
        event_id,
        auth.principal.user_id,
        payload.name.as_deref(),
        payload.location.as_deref(),
        photo.as_deref(),
        payload.time.as_deref(),
        payload.description.as_deref(),
    )
    .await?;

    let row = match outcome {
        UpdateOutcome::Updated(row) => row,
        UpdateOutcome::NotFound => {
            let _ = tx.rollback().await;
            return Err(ApiError::NotFound("Event not found"));
        }
        UpdateOutcome::Forbidden => {
            let _ = tx.rollback().await;
            return Err(ApiError::OwnershipViolation(
                "You are not the owner of this event",
            ));
        }
    };

    // Subscribers learn what changed in the same transaction as the change.
    notify_event_updated(&mut tx, event_id, &row.name, &changes).await?;
    tx.commit()
        .await
        .map_err(|err| ApiError::Internal(err.into()))?;

    info!(event_id, "event updated");
    Ok((
        StatusCode::OK,
        auth.response_headers,
        Json(event_response(*row)),
    ))
}

#[utoipa::path(
    delete,
    path = "/events/{event_id}",
    params(("event_id" = i64, Path, description = "Event id")),
    responses(
        (status = 200, description = "Event deleted", body = OkResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Event not found")
    ),
    tag = "events"
)]
pub async fn remove_event(
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth = require_auth(&headers, &pool, &auth_state).await?;

    match delete_event(&pool, event_id, auth.principal.user_id).await? {
        DeleteOutcome::Deleted => {
            info!(event_id, "event deleted");
            Ok((
                StatusCode::OK,
                auth.response_headers,
                Json(OkResponse { ok: true }),
            ))
        }
        DeleteOutcome::NotFound => Err(ApiError::NotFound("Event not found")),
        DeleteOutcome::Forbidden => Err(ApiError::OwnershipViolation(
            "You are not the owner of this event",
        )),
    }
}

/// Field names (and new values where cheap to render) for the notification
/// payload. Photo changes are named but not echoed.
fn changed_fields(payload: &EventUpdateRequest) -> Map<String, Value> {
    let mut changes = Map::new();
    if let Some(name) = &payload.name {
        changes.insert("name".to_string(), json!(name));
    }
    if let Some(location) = &payload.location {
        changes.insert("location".to_string(), json!(location));
    }
    if let Some(time) = &payload.time {
        changes.insert("time".to_string(), json!(time));
    }
    if let Some(description) = &payload.description {
        changes.insert("description".to_string(), json!(description));
    }
    if payload.photo.is_some() {
        changes.insert("photo".to_string(), json!("updated"));
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_accepted() {
        assert!(valid_timestamp("2026-08-01"));
        assert!(valid_timestamp("2026-08-01T18:30:00"));
        assert!(valid_timestamp("2026-08-01 18:30:00"));
        assert!(valid_timestamp("2026-08-01T18:30:00Z"));
        assert!(valid_timestamp("2026-08-01T18:30:00+02:00"));
        assert!(valid_timestamp("2026-08-01T18:30:00.123Z"));
    }

    #[test]
    fn timestamps_rejected() {
        assert!(!valid_timestamp("next friday"));
        assert!(!valid_timestamp("2026-8-1"));
        assert!(!valid_timestamp(""));
        assert!(!valid_timestamp("2026-08-01T18"));
    }

    #[test]
    fn photo_decoding() {
        assert_eq!(decode_photo(None).expect("none is fine"), None);
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"img");
        assert_eq!(
            decode_photo(Some(&encoded)).expect("valid base64"),
            Some(b"img".to_vec())
        );
        assert!(decode_photo(Some("%%%")).is_err());
    }

    #[test]
    fn changed_fields_tracks_provided_values() {
        let payload = EventUpdateRequest {
            name: Some("New name".to_string()),
            location: None,
            photo: Some("aGk=".to_string()),
            time: None,
            description: None,
        };
        let changes = changed_fields(&payload);
        assert!(changes.contains_key("name"));
        assert!(changes.contains_key("photo"));
        assert!(!changes.contains_key("location"));
    }
}
