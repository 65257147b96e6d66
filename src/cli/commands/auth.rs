use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("token-key")
                .long("token-key")
                .help("Symmetric signing key for session tokens")
                .env("TESSERA_TOKEN_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("token-algorithm")
                .long("token-algorithm")
                .help("HMAC signing algorithm for session tokens (HS256, HS384, HS512)")
                .env("TESSERA_TOKEN_ALGORITHM")
                .default_value("HS256"),
        )
        .arg(
            Arg::new("access-ttl-minutes")
                .long("access-ttl-minutes")
                .help("Access token TTL in minutes")
                .env("TESSERA_ACCESS_TTL_MINUTES")
                .default_value("5")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("refresh-ttl-days")
                .long("refresh-ttl-days")
                .help("Refresh token TTL in days")
                .env("TESSERA_REFRESH_TTL_DAYS")
                .default_value("7")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for pass/invitation links and CORS")
                .env("TESSERA_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
}

#[cfg(test)]
mod tests {
    use crate::cli::commands;

    #[test]
    fn token_key_is_required() {
        temp_env::with_vars([("TESSERA_TOKEN_KEY", None::<&str>)], || {
            let command = commands::new();
            let result =
                command.try_get_matches_from(vec!["tessera", "--dsn", "postgres://localhost"]);
            assert_eq!(
                result.map_err(|e| e.kind()),
                Err(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn algorithm_override() {
        let command = commands::new();
        let matches = command.get_matches_from(vec![
            "tessera",
            "--dsn",
            "postgres://localhost",
            "--token-key",
            "k",
            "--token-algorithm",
            "HS512",
        ]);
        assert_eq!(
            matches.get_one::<String>("token-algorithm").cloned(),
            Some("HS512".to_string())
        );
    }
}
