use crate::store::{Backend, StorageConfig};
use clap::{Arg, ArgMatches, Command};

pub const ARG_STORE: &str = "store";
pub const ARG_RATE_LIMIT_STORE: &str = "rate-limit-store";
pub const ARG_DSN: &str = "dsn";

/// Parse storage arguments from matches.
///
/// # Errors
/// Returns an error if a postgres backend is selected without `--dsn`.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<StorageConfig> {
    let backend = |id: &str| matches.get_one::<Backend>(id).copied().unwrap_or_default();

    let config = StorageConfig {
        store: backend(ARG_STORE),
        rate_limit_store: backend(ARG_RATE_LIMIT_STORE),
        dsn: matches
            .get_one::<String>(ARG_DSN)
            .cloned()
            .filter(|v| !v.trim().is_empty()),
    };
    config
        .validate()
        .map_err(|_| anyhow::anyhow!("missing required argument: --{ARG_DSN}"))?;
    Ok(config)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STORE)
                .long(ARG_STORE)
                .help("Where accounts, sessions and tenants live: memory or postgres")
                .env("WARDEN_STORE")
                .default_value("memory")
                .value_parser(clap::value_parser!(Backend)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_STORE)
                .long(ARG_RATE_LIMIT_STORE)
                .help("Where rate-limit counters live: memory or postgres")
                .long_help(
                    "Where rate-limit counters live: memory or postgres.\n\nUse postgres when more than one instance serves traffic; in-memory counters are per process.",
                )
                .env("WARDEN_RATE_LIMIT_STORE")
                .default_value("memory")
                .value_parser(clap::value_parser!(Backend)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .long_help("Database connection string. Required when a postgres store is selected.")
                .env("WARDEN_DSN")
                .hide_env_values(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_from(args: &[&str]) -> anyhow::Result<StorageConfig> {
        let command = with_args(Command::new("warden"));
        let matches =
            command.try_get_matches_from(std::iter::once("warden").chain(args.iter().copied()))?;
        parse(&matches)
    }

    fn without_storage_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars(
            [
                ("WARDEN_STORE", None::<&str>),
                ("WARDEN_RATE_LIMIT_STORE", None),
                ("WARDEN_DSN", None),
            ],
            f,
        )
    }

    #[test]
    fn memory_is_the_default() -> anyhow::Result<()> {
        without_storage_env(|| {
            assert_eq!(parse_from(&[])?, StorageConfig::default());
            Ok(())
        })
    }

    #[test]
    fn postgres_needs_dsn() -> anyhow::Result<()> {
        without_storage_env(|| {
            let err = parse_from(&["--store", "postgres"]).err().map(|e| e.to_string());
            assert!(err.is_some_and(|message| message.contains("--dsn")));

            let config = parse_from(&[
                "--rate-limit-store",
                "postgres",
                "--dsn",
                "postgres://warden@localhost:5432/warden",
            ])?;
            assert_eq!(config.store, Backend::Memory);
            assert_eq!(config.rate_limit_store, Backend::Postgres);
            Ok(())
        })
    }

    #[test]
    fn storage_from_env() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_STORE", Some("postgresql")),
                ("WARDEN_RATE_LIMIT_STORE", None),
                ("WARDEN_DSN", Some("postgres://warden@localhost:5432/warden")),
            ],
            || {
                let config = parse_from(&[])?;
                assert_eq!(config.store, Backend::Postgres);
                assert_eq!(
                    config.dsn.as_deref(),
                    Some("postgres://warden@localhost:5432/warden")
                );
                Ok(())
            },
        )
    }

    #[test]
    fn unknown_backend_is_rejected() {
        without_storage_env(|| {
            assert!(parse_from(&["--store", "redis"]).is_err());
        });
    }
}
