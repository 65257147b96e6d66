use crate::api::{
    self,
    email::{EmailWorkerConfig, LogEmailSender, SmtpEmailSender},
    handlers::auth::state::AuthConfig,
};
use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub token_key: SecretString,
    pub token_algorithm: String,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub frontend_base_url: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<SecretString>,
    pub smtp_from: String,
    pub outbox_poll_seconds: u64,
    pub outbox_batch_size: usize,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if configuration is invalid, the database cannot be
/// reached within the startup retry budget, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = AuthConfig::new(args.frontend_base_url, args.token_key)
        .with_algorithm(&args.token_algorithm)?
        .with_access_ttl_seconds(args.access_ttl_minutes.saturating_mul(60))
        .with_refresh_ttl_seconds(args.refresh_ttl_days.saturating_mul(86_400));

    let email_config = EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.outbox_poll_seconds)
        .with_batch_size(args.outbox_batch_size);

    let sender: Arc<dyn api::email::EmailSender> = match args.smtp_host {
        Some(host) => {
            let username = args
                .smtp_username
                .ok_or_else(|| anyhow!("--smtp-username is required with --smtp-host"))?;
            let password = args
                .smtp_password
                .ok_or_else(|| anyhow!("--smtp-password is required with --smtp-host"))?;
            Arc::new(SmtpEmailSender::new(
                host,
                args.smtp_port,
                username,
                password,
                args.smtp_from,
            )?)
        }
        None => Arc::new(LogEmailSender),
    };

    api::new(args.port, args.dsn, auth_config, email_config, sender).await
}
