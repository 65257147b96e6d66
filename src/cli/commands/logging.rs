use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("TESSERA_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn log_level_names_map_to_counts() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, &level) in levels.iter().enumerate() {
            temp_env::with_vars([("TESSERA_LOG_LEVEL", Some(level))], || {
                let command = commands::new();
                let matches = command.get_matches_from(vec![
                    "tessera",
                    "--dsn",
                    "postgres://localhost",
                    "--token-key",
                    "k",
                ]);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn verbosity_flags_count() {
        temp_env::with_vars([("TESSERA_LOG_LEVEL", None::<String>)], || {
            let command = commands::new();
            let matches = command.get_matches_from(vec![
                "tessera",
                "--dsn",
                "postgres://localhost",
                "--token-key",
                "k",
                "-vvv",
            ]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn invalid_level_rejected() {
        let parser = validator_log_level();
        let command = clap::Command::new("probe").arg(
            Arg::new("level")
                .long("level")
                .value_parser(parser)
                .action(clap::ArgAction::Set),
        );
        let result = command.try_get_matches_from(vec!["probe", "--level", "loud"]);
        assert!(result.is_err());
    }
}
