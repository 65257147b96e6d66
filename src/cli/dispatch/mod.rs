//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let token_key = matches
        .get_one::<String>("token-key")
        .cloned()
        .context("missing required argument: --token-key")?;

    let smtp_password = matches
        .get_one::<String>("smtp-password")
        .cloned()
        .map(SecretString::from);

    Ok(Action::Server(Box::new(Args {
        port,
        dsn,
        token_key: SecretString::from(token_key),
        token_algorithm: matches
            .get_one::<String>("token-algorithm")
            .cloned()
            .unwrap_or_else(|| "HS256".to_string()),
        access_ttl_minutes: matches
            .get_one::<i64>("access-ttl-minutes")
            .copied()
            .unwrap_or(5),
        refresh_ttl_days: matches
            .get_one::<i64>("refresh-ttl-days")
            .copied()
            .unwrap_or(7),
        frontend_base_url: matches
            .get_one::<String>("frontend-base-url")
            .cloned()
            .unwrap_or_else(|| "http://localhost:5173".to_string()),
        smtp_host: matches.get_one::<String>("smtp-host").cloned(),
        smtp_port: matches.get_one::<u16>("smtp-port").copied().unwrap_or(587),
        smtp_username: matches.get_one::<String>("smtp-username").cloned(),
        smtp_password,
        smtp_from: matches
            .get_one::<String>("smtp-from")
            .cloned()
            .unwrap_or_else(|| "Tessera <no-reply@tessera.events>".to_string()),
        outbox_poll_seconds: matches
            .get_one::<u64>("outbox-poll-seconds")
            .copied()
            .unwrap_or(5),
        outbox_batch_size: matches
            .get_one::<usize>("outbox-batch-size")
            .copied()
            .unwrap_or(10),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;
    use secrecy::ExposeSecret;

    #[test]
    fn handler_builds_server_args() {
        temp_env::with_vars(
            [
                ("TESSERA_SMTP_HOST", None::<&str>),
                ("TESSERA_SMTP_USERNAME", None::<&str>),
                ("TESSERA_SMTP_PASSWORD", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "tessera",
                    "--port",
                    "8081",
                    "--dsn",
                    "postgres://user@localhost:5432/tessera",
                    "--token-key",
                    "dispatch-key",
                    "--refresh-ttl-days",
                    "14",
                ]);
                let action = handler(&matches).expect("handler should succeed");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8081);
                assert_eq!(args.dsn, "postgres://user@localhost:5432/tessera");
                assert_eq!(args.token_key.expose_secret(), "dispatch-key");
                assert_eq!(args.token_algorithm, "HS256");
                assert_eq!(args.access_ttl_minutes, 5);
                assert_eq!(args.refresh_ttl_days, 14);
                assert!(args.smtp_host.is_none());
                assert_eq!(args.outbox_batch_size, 10);
            },
        );
    }
}
