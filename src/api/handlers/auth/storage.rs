//! Database helpers for identity records.

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::utils::is_unique_violation;
use crate::api::email::enqueue_email;

/// Identity row as the session layer needs it.
pub(crate) struct UserRecord {
    pub(crate) id: i64,
    pub(crate) login: String,
    pub(crate) email: Option<String>,
    pub(crate) password_hash: Option<String>,
    pub(crate) is_guest: bool,
}

/// Outcome when attempting to create a registered account.
#[derive(Debug)]
pub(crate) enum RegisterOutcome {
    Created(i64),
    EmailTaken,
}

pub(crate) async fn fetch_user(pool: &PgPool, user_id: i64) -> Result<Option<UserRecord>> {
    let query = "SELECT id, login, email, password_hash, is_guest FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch user")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        login: row.get("login"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_guest: row.get("is_guest"),
    }))
}

pub(crate) async fn lookup_user_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<UserRecord>> {
    let query = "SELECT id, login, email, password_hash, is_guest FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.map(|row| UserRecord {
        id: row.get("id"),
        login: row.get("login"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_guest: row.get("is_guest"),
    }))
}

/// Create a registered account and queue its welcome email atomically.
pub(crate) async fn insert_registered_user(
    pool: &PgPool,
    login: &str,
    email: &str,
    password_hash: &str,
) -> Result<RegisterOutcome> {
    // One transaction so the account and its welcome email stay consistent.
    let mut tx = pool.begin().await.context("begin register transaction")?;

    let query = r"
        INSERT INTO users (login, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(login)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: i64 = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(RegisterOutcome::EmailTaken);
            }
            return Err(err).context("failed to insert user");
        }
    };

    let payload = json!({ "login": login });
    enqueue_email(&mut tx, email, "welcome", &payload).await?;

    tx.commit().await.context("commit register transaction")?;

    Ok(RegisterOutcome::Created(user_id))
}

/// Create a guest identity. Guests have no email and no password; they exist
/// to attend the one event their pass admits them to.
pub(crate) async fn insert_guest_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    display_name: &str,
) -> Result<i64> {
    let query = r"
        INSERT INTO users (login, is_guest)
        VALUES ($1, TRUE)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(display_name)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert guest user")?;

    Ok(row.get("id"))
}

#[cfg(test)]
mod tests {
    use super::{RegisterOutcome, UserRecord};

    #[test]
    fn register_outcome_debug_names() {
        assert_eq!(format!("{:?}", RegisterOutcome::Created(1)), "Created(1)");
        assert_eq!(format!("{:?}", RegisterOutcome::EmailTaken), "EmailTaken");
    }

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            id: 7,
            login: "ann".to_string(),
            email: Some("ann@x.com".to_string()),
            password_hash: None,
            is_guest: false,
        };
        assert_eq!(record.id, 7);
        assert_eq!(record.login, "ann");
        assert_eq!(record.email.as_deref(), Some("ann@x.com"));
        assert!(record.password_hash.is_none());
        assert!(!record.is_guest);
    }
}
