use clap::{Arg, Command};

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("smtp-host")
                .long("smtp-host")
                .help("SMTP relay host; when absent, outbound email is logged instead of sent")
                .env("TESSERA_SMTP_HOST"),
        )
        .arg(
            Arg::new("smtp-port")
                .long("smtp-port")
                .help("SMTP relay port")
                .env("TESSERA_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("smtp-username")
                .long("smtp-username")
                .help("SMTP authentication username")
                .env("TESSERA_SMTP_USERNAME"),
        )
        .arg(
            Arg::new("smtp-password")
                .long("smtp-password")
                .help("SMTP authentication password")
                .env("TESSERA_SMTP_PASSWORD")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("smtp-from")
                .long("smtp-from")
                .help("From address for outbound mail")
                .env("TESSERA_SMTP_FROM")
                .default_value("Tessera <no-reply@tessera.events>"),
        )
        .arg(
            Arg::new("outbox-poll-seconds")
                .long("outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("TESSERA_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("outbox-batch-size")
                .long("outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("TESSERA_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
}
