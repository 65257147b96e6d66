//! Database helpers for events.
//!
//! Write operations return tagged outcomes so ownership and existence checks
//! stay exhaustively matchable in the handlers.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

/// Timestamps render as ISO-8601 text in SQL so no date-time crate is needed
/// on the Rust side.
const TIME_FORMAT: &str = r#"YYYY-MM-DD"T"HH24:MI:SS"Z""#;

pub(crate) struct EventRow {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) location: String,
    pub(crate) photo: Option<Vec<u8>>,
    pub(crate) time: String,
    pub(crate) description: Option<String>,
    pub(crate) owner_id: i64,
}

#[derive(Debug)]
pub(crate) enum UpdateOutcome {
    Updated(Box<EventRow>),
    NotFound,
    Forbidden,
}

#[derive(Debug)]
pub(crate) enum DeleteOutcome {
    Deleted,
    NotFound,
    Forbidden,
}

impl std::fmt::Debug for EventRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRow")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> EventRow {
    EventRow {
        id: row.get("id"),
        name: row.get("name"),
        location: row.get("location"),
        photo: row.get("photo"),
        time: row.get("time"),
        description: row.get("description"),
        owner_id: row.get("owner_id"),
    }
}

pub(crate) async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    name: &str,
    location: &str,
    photo: Option<&[u8]>,
    time: &str,
    description: Option<&str>,
    owner_id: i64,
) -> Result<EventRow> {
    let query = format!(
        r#"
        INSERT INTO events (name, location, photo, time, description, owner_id)
        VALUES ($1, $2, $3, $4::timestamptz, $5, $6)
        RETURNING id, name, location, photo,
            to_char(time AT TIME ZONE 'utc', '{TIME_FORMAT}') AS time,
            description, owner_id
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(name)
        .bind(location)
        .bind(photo)
        .bind(time)
        .bind(description)
        .bind(owner_id)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert event")?;

    Ok(row_to_event(&row))
}

pub(crate) async fn list_events(pool: &PgPool) -> Result<Vec<EventRow>> {
    let query = format!(
        r#"
        SELECT id, name, location, photo,
            to_char(time AT TIME ZONE 'utc', '{TIME_FORMAT}') AS time,
            description, owner_id
        FROM events
        ORDER BY time ASC
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list events")?;

    Ok(rows.iter().map(row_to_event).collect())
}

pub(crate) async fn fetch_event(pool: &PgPool, event_id: i64) -> Result<Option<EventRow>> {
    let query = format!(
        r#"
        SELECT id, name, location, photo,
            to_char(time AT TIME ZONE 'utc', '{TIME_FORMAT}') AS time,
            description, owner_id
        FROM events
        WHERE id = $1
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(event_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch event")?;

    Ok(row.as_ref().map(row_to_event))
}

/// Update an event if the actor owns it. Fields left `None` keep their value.
pub(crate) async fn update_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i64,
    actor_id: i64,
    name: Option<&str>,
    location: Option<&str>,
    photo: Option<&[u8]>,
    time: Option<&str>,
    description: Option<&str>,
) -> Result<UpdateOutcome> {
    // The ownership predicate is part of the UPDATE itself, so a non-owner
    // can never win a race against the owner.
    let query = format!(
        r#"
        UPDATE events
        SET name = COALESCE($1, name),
            location = COALESCE($2, location),
            photo = COALESCE($3, photo),
            time = COALESCE($4::timestamptz, time),
            description = COALESCE($5, description)
        WHERE id = $6 AND owner_id = $7
        RETURNING id, name, location, photo,
            to_char(time AT TIME ZONE 'utc', '{TIME_FORMAT}') AS time,
            description, owner_id
        "#
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(name)
        .bind(location)
        .bind(photo)
        .bind(time)
        .bind(description)
        .bind(event_id)
        .bind(actor_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update event")?;

    if let Some(row) = row {
        return Ok(UpdateOutcome::Updated(Box::new(row_to_event(&row))));
    }

    match fetch_owner(tx, event_id).await? {
        Some(_) => Ok(UpdateOutcome::Forbidden),
        None => Ok(UpdateOutcome::NotFound),
    }
}

pub(crate) async fn delete_event(
    pool: &PgPool,
    event_id: i64,
    actor_id: i64,
) -> Result<DeleteOutcome> {
    let mut tx = pool.begin().await.context("begin delete transaction")?;

    let query = "DELETE FROM events WHERE id = $1 AND owner_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(event_id)
        .bind(actor_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete event")?;

    let outcome = if result.rows_affected() > 0 {
        DeleteOutcome::Deleted
    } else {
        match fetch_owner(&mut tx, event_id).await? {
            Some(_) => DeleteOutcome::Forbidden,
            None => DeleteOutcome::NotFound,
        }
    };

    tx.commit().await.context("commit delete transaction")?;
    Ok(outcome)
}

async fn fetch_owner(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: i64,
) -> Result<Option<i64>> {
    let query = "SELECT owner_id FROM events WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to fetch event owner")?;
    Ok(row.map(|row| row.get("owner_id")))
}

#[cfg(test)]
mod tests {
    use super::{DeleteOutcome, UpdateOutcome};

    #[test]
    fn outcome_debug_names() {
        assert_eq!(format!("{:?}", UpdateOutcome::NotFound), "NotFound");
        assert_eq!(format!("{:?}", UpdateOutcome::Forbidden), "Forbidden");
        assert_eq!(format!("{:?}", DeleteOutcome::Deleted), "Deleted");
        assert_eq!(format!("{:?}", DeleteOutcome::NotFound), "NotFound");
        assert_eq!(format!("{:?}", DeleteOutcome::Forbidden), "Forbidden");
    }
}
