use crate::api::handlers::auth::token::MIN_SECRET_LENGTH;
use anyhow::{Context, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_SESSION_TIMEOUT_SECONDS: &str = "session-timeout-seconds";
pub const ARG_RESET_TOKEN_TTL_SECONDS: &str = "reset-token-ttl-seconds";
pub const ARG_BEARER_TOKEN_TTL_SECONDS: &str = "bearer-token-ttl-seconds";
pub const ARG_PASSWORD_MIN_LENGTH: &str = "password-min-length";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";
pub const ARG_EMAIL_OUTBOX_MAX_ATTEMPTS: &str = "email-outbox-max-attempts";
pub const ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS: &str = "email-outbox-backoff-base-seconds";
pub const ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS: &str = "email-outbox-backoff-max-seconds";

#[derive(Debug, Clone)]
pub struct EmailOutboxOptions {
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub frontend_base_url: String,
    pub token_secret: SecretString,
    pub session_timeout_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub bearer_token_ttl_seconds: i64,
    pub password_min_length: usize,
    pub trust_proxy_headers: bool,
    pub email_outbox: EmailOutboxOptions,
}

impl Options {
    /// Parse auth arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the token secret is missing or too short, or a
    /// lifetime is not positive.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .filter(|secret| !secret.trim().is_empty())
            .map(SecretString::from)
            .with_context(|| format!("missing required argument: --{ARG_TOKEN_SECRET}"))?;
        if token_secret.expose_secret().len() < MIN_SECRET_LENGTH {
            bail!("--{ARG_TOKEN_SECRET} must be at least {MIN_SECRET_LENGTH} characters");
        }

        let positive = |id: &str| -> anyhow::Result<i64> {
            let value = matches.get_one::<i64>(id).copied().unwrap_or_default();
            if value <= 0 {
                bail!("--{id} must be positive");
            }
            Ok(value)
        };

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            token_secret,
            session_timeout_seconds: positive(ARG_SESSION_TIMEOUT_SECONDS)?,
            reset_token_ttl_seconds: positive(ARG_RESET_TOKEN_TTL_SECONDS)?,
            bearer_token_ttl_seconds: positive(ARG_BEARER_TOKEN_TTL_SECONDS)?,
            password_min_length: matches
                .get_one::<usize>(ARG_PASSWORD_MIN_LENGTH)
                .copied()
                .unwrap_or(8),
            trust_proxy_headers: matches.get_flag(ARG_TRUST_PROXY_HEADERS),
            email_outbox: EmailOutboxOptions {
                max_attempts: matches
                    .get_one::<u32>(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                    .copied()
                    .unwrap_or(5),
                backoff_base_seconds: matches
                    .get_one::<u64>(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                    .copied()
                    .unwrap_or(5),
                backoff_max_seconds: matches
                    .get_one::<u64>(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                    .copied()
                    .unwrap_or(300),
            },
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_email_outbox_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for reset links and CORS")
                .env("WARDEN_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("Secret used to sign bearer tokens (at least 32 characters)")
                .long_help(
                    "Secret used to sign bearer tokens (HS256). Must be at least 32 characters.\n\nRotating it invalidates every outstanding bearer token.",
                )
                .env("WARDEN_TOKEN_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TIMEOUT_SECONDS)
                .long(ARG_SESSION_TIMEOUT_SECONDS)
                .help("Idle timeout for cookie sessions in seconds")
                .env("WARDEN_SESSION_TIMEOUT_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_RESET_TOKEN_TTL_SECONDS)
                .long(ARG_RESET_TOKEN_TTL_SECONDS)
                .help("Password reset token TTL in seconds")
                .env("WARDEN_RESET_TOKEN_TTL_SECONDS")
                .default_value("7200")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_BEARER_TOKEN_TTL_SECONDS)
                .long(ARG_BEARER_TOKEN_TTL_SECONDS)
                .help("Bearer token TTL in seconds")
                .env("WARDEN_BEARER_TOKEN_TTL_SECONDS")
                .default_value("432000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_MIN_LENGTH)
                .long(ARG_PASSWORD_MIN_LENGTH)
                .help("Minimum password length")
                .env("WARDEN_PASSWORD_MIN_LENGTH")
                .default_value("8")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Rate-limit by x-real-ip/x-forwarded-for instead of the peer address")
                .long_help(
                    "Rate-limit by x-real-ip/x-forwarded-for instead of the peer address.\n\nEnable only behind a reverse proxy that overwrites these headers; otherwise clients can pick their own address.",
                )
                .env("WARDEN_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}

fn with_email_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .long(ARG_EMAIL_OUTBOX_MAX_ATTEMPTS)
                .help("Max delivery attempts before an email is dropped")
                .env("WARDEN_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .long(ARG_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS)
                .help("Base delay for email outbox retry backoff")
                .env("WARDEN_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .long(ARG_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS)
                .help("Max delay for email outbox retry backoff")
                .env("WARDEN_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn matches(args: &[&str]) -> anyhow::Result<ArgMatches> {
        let command = with_args(Command::new("warden"));
        Ok(command.try_get_matches_from(std::iter::once("warden").chain(args.iter().copied()))?)
    }

    #[test]
    fn defaults_apply_once_secret_is_set() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_TOKEN_SECRET", Some(SECRET)),
                ("WARDEN_FRONTEND_BASE_URL", None),
                ("WARDEN_SESSION_TIMEOUT_SECONDS", None),
                ("WARDEN_PASSWORD_MIN_LENGTH", None),
                ("WARDEN_TRUST_PROXY_HEADERS", None),
            ],
            || {
                let options = Options::parse(&matches(&[])?)?;
                assert_eq!(options.frontend_base_url, "http://localhost:3000");
                assert_eq!(options.token_secret.expose_secret(), SECRET);
                assert_eq!(options.session_timeout_seconds, 1800);
                assert_eq!(options.reset_token_ttl_seconds, 7200);
                assert_eq!(options.bearer_token_ttl_seconds, 432_000);
                assert_eq!(options.password_min_length, 8);
                assert!(!options.trust_proxy_headers);
                assert_eq!(options.email_outbox.max_attempts, 5);
                Ok(())
            },
        )
    }

    #[test]
    fn env_overrides_defaults() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_TOKEN_SECRET", Some(SECRET)),
                ("WARDEN_FRONTEND_BASE_URL", Some("https://app.warden.dev")),
                ("WARDEN_SESSION_TIMEOUT_SECONDS", Some("60")),
                ("WARDEN_PASSWORD_MIN_LENGTH", Some("12")),
                ("WARDEN_TRUST_PROXY_HEADERS", Some("true")),
            ],
            || {
                let options = Options::parse(&matches(&[])?)?;
                assert_eq!(options.frontend_base_url, "https://app.warden.dev");
                assert_eq!(options.session_timeout_seconds, 60);
                assert_eq!(options.password_min_length, 12);
                assert!(options.trust_proxy_headers);
                Ok(())
            },
        )
    }

    #[test]
    fn token_secret_is_required_and_long_enough() -> anyhow::Result<()> {
        temp_env::with_vars([("WARDEN_TOKEN_SECRET", None::<&str>)], || {
            let err = Options::parse(&matches(&[])?).err().map(|e| e.to_string());
            assert!(err.is_some_and(|message| message.contains("--token-secret")));

            let err = Options::parse(&matches(&["--token-secret", "short"])?)
                .err()
                .map(|e| e.to_string());
            assert!(err.is_some_and(|message| message.contains("at least 32")));
            Ok(())
        })
    }

    #[test]
    fn lifetimes_must_be_positive() -> anyhow::Result<()> {
        temp_env::with_vars([("WARDEN_TOKEN_SECRET", Some(SECRET))], || {
            let result = Options::parse(&matches(&["--reset-token-ttl-seconds", "0"])?);
            assert!(result.is_err());
            Ok(())
        })
    }
}
