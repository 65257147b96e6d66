//! Email outbox and delivery.
//!
//! Request handlers never send mail directly. They enqueue a row in
//! `email_outbox` inside the same transaction as the mutation that triggered
//! it, so a notification exists exactly when its cause committed. A
//! background task polls the table, locks a batch via
//! `FOR UPDATE SKIP LOCKED`, and hands each row to an [`EmailSender`].
//!
//! Delivery is at-most-once by design: a row gets one attempt and is marked
//! `sent` or `failed`. Failures are logged and swallowed; nothing retries and
//! nothing surfaces to the request that caused the notification.

use anyhow::{anyhow, Context, Result};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, Instrument};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the outbox worker.
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to mark it as failed.
    ///
    /// # Errors
    /// Returns an error when delivery fails; the worker records it and moves
    /// on.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email outbox send stub"
        );
        Ok(())
    }
}

/// SMTP delivery via lettre. A fresh transport per send keeps connection
/// state out of the worker loop.
pub struct SmtpEmailSender {
    host: String,
    port: u16,
    credentials: Credentials,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// # Errors
    /// Returns an error if the configured from address does not parse.
    pub fn new(
        host: String,
        port: u16,
        username: String,
        password: SecretString,
        from: String,
    ) -> Result<Self> {
        let from = from
            .parse::<Mailbox>()
            .map_err(|err| anyhow!("invalid from address {from:?}: {err}"))?;
        Ok(Self {
            host,
            port,
            credentials: Credentials::new(username, password.expose_secret().to_string()),
            from,
        })
    }
}

impl std::fmt::Debug for SmtpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEmailSender")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl EmailSender for SmtpEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        let (subject, body) = render_message(message)?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(message
                .to_email
                .parse::<Mailbox>()
                .map_err(|err| anyhow!("invalid recipient {:?}: {err}", message.to_email))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .context("failed to build email message")?;

        let transport = SmtpTransport::relay(&self.host)
            .context("failed to configure SMTP relay")?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build();

        transport.send(&email).context("SMTP send failed")?;
        Ok(())
    }
}

/// Render a subject and plain-text body from an outbox row.
fn render_message(message: &EmailMessage) -> Result<(String, String)> {
    let payload: Value =
        serde_json::from_str(&message.payload_json).context("invalid outbox payload")?;
    let field = |name: &str| {
        payload
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    match message.template.as_str() {
        "welcome" => {
            let login = field("login");
            Ok((
                "Welcome to Tessera!".to_string(),
                format!(
                    "Hello {login},\n\nWelcome to Tessera!\n\
                     We're excited to have you on board.\n\n\
                     Best regards,\nThe Tessera Team\n"
                ),
            ))
        }
        "event_updated" => {
            let event_name = field("event_name");
            let changes = payload
                .get("changes")
                .and_then(Value::as_object)
                .map(|changes| {
                    changes
                        .iter()
                        .map(|(key, value)| format!("- {key}: {value}"))
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| "Event details have been modified.".to_string());
            Ok((
                format!("Event {event_name} has been updated"),
                format!(
                    "Hello {},\n\nAn event you're participating in has been updated.\n\n\
                     Event: {event_name}\nChanges:\n{changes}\n\n\
                     Best regards,\nThe Tessera Team\n",
                    field("login"),
                ),
            ))
        }
        "participant_joined" => {
            let event_name = field("event_name");
            let participant = field("new_participant_name");
            Ok((
                format!("New participant joined event {event_name}"),
                format!(
                    "Hello {},\n\nA new participant has joined an event you're part of.\n\n\
                     Event: {event_name}\nNew participant: {participant}\n\n\
                     Best regards,\nThe Tessera Team\n",
                    field("login"),
                ),
            ))
        }
        other => Err(anyhow!("unknown email template: {other}")),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
}

impl EmailWorkerConfig {
    /// Default worker config: 5s poll interval, 10 messages per batch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let batch_size = if self.batch_size == 0 {
            1
        } else {
            self.batch_size
        };
        Self {
            poll_interval,
            batch_size,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Queue an email inside the caller's transaction.
pub(crate) async fn enqueue_email(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload: &Value,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload).context("failed to serialize payload")?;
    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

/// Spawn a background task that polls and processes the email outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            let batch_result = process_outbox_batch(&pool, sender.as_ref(), &config).await;
            if let Err(err) = batch_result {
                error!("email outbox batch failed: {err}");
            }

            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    // Grab a locked batch so multiple workers can run without double-sending.
    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json
        FROM email_outbox
        WHERE status = 'pending'
        ORDER BY created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(0))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    if rows.is_empty() {
        // Commit even on empty to release locks and keep the loop consistent.
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };

        // One attempt per row: at-most-once delivery.
        let send_result = sender.send(&message);
        if let Err(err) = &send_result {
            error!(outbox_id = %id, to_email = %message.to_email, "email send failed: {err:#}");
        }
        mark_outbox_row(&mut tx, id, send_result).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(row_count)
}

async fn mark_outbox_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    send_result: Result<()>,
) -> Result<()> {
    let (query, last_error) = match send_result {
        Ok(()) => (
            r"
                UPDATE email_outbox
                SET status = 'sent',
                    attempts = attempts + 1,
                    last_error = NULL,
                    sent_at = NOW()
                WHERE id = $1
            ",
            None,
        ),
        Err(err) => (
            r"
                UPDATE email_outbox
                SET status = 'failed',
                    attempts = attempts + 1,
                    last_error = $2
                WHERE id = $1
            ",
            Some(err.to_string()),
        ),
    };

    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let mut statement = sqlx::query(query).bind(id);
    if let Some(last_error) = last_error {
        statement = statement.bind(last_error);
    }
    statement
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update outbox row status")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(template: &str, payload: Value) -> EmailMessage {
        EmailMessage {
            to_email: "ann@x.com".to_string(),
            template: template.to_string(),
            payload_json: payload.to_string(),
        }
    }

    #[test]
    fn render_welcome() {
        let (subject, body) =
            render_message(&message("welcome", json!({"login": "Ann"}))).expect("should render");
        assert_eq!(subject, "Welcome to Tessera!");
        assert!(body.contains("Hello Ann"));
    }

    #[test]
    fn render_event_updated_lists_changes() {
        let payload = json!({
            "login": "Ann",
            "event_name": "Rooftop Party",
            "changes": {"location": "\"New Hall\""},
        });
        let (subject, body) =
            render_message(&message("event_updated", payload)).expect("should render");
        assert_eq!(subject, "Event Rooftop Party has been updated");
        assert!(body.contains("location"));
    }

    #[test]
    fn render_event_updated_without_changes() {
        let payload = json!({"login": "Ann", "event_name": "Rooftop Party", "changes": {}});
        let (_, body) = render_message(&message("event_updated", payload)).expect("should render");
        assert!(body.contains("Event details have been modified."));
    }

    #[test]
    fn render_participant_joined() {
        let payload = json!({
            "login": "Ann",
            "event_name": "Rooftop Party",
            "new_participant_name": "Bob",
        });
        let (subject, body) =
            render_message(&message("participant_joined", payload)).expect("should render");
        assert!(subject.contains("Rooftop Party"));
        assert!(body.contains("Bob"));
    }

    #[test]
    fn unknown_template_is_an_error() {
        assert!(render_message(&message("mystery", json!({}))).is_err());
    }

    #[test]
    fn log_sender_always_succeeds() {
        let sender = LogEmailSender;
        assert!(sender.send(&message("welcome", json!({"login": "Ann"}))).is_ok());
    }

    #[test]
    fn worker_config_normalizes_zeroes() {
        let config = EmailWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn smtp_sender_rejects_bad_from() {
        let result = SmtpEmailSender::new(
            "smtp.example.com".to_string(),
            587,
            "mailer".to_string(),
            SecretString::from("password"),
            "not an address".to_string(),
        );
        assert!(result.is_err());
    }
}
