//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an action: `purge` when the subcommand is
//! given, otherwise the API server with its full configuration.

use crate::cli::actions::{Action, purge, server};
use crate::cli::commands::{ARG_OLDER_THAN_DAYS, CMD_PURGE, auth, oauth, storage};
use anyhow::Result;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let storage = storage::parse(matches)?;

    if let Some(purge_matches) = matches.subcommand_matches(CMD_PURGE) {
        return Ok(Action::Purge(purge::Args {
            storage,
            older_than_days: purge_matches
                .get_one::<u32>(ARG_OLDER_THAN_DAYS)
                .copied()
                .unwrap_or(90),
            session_timeout_seconds: matches
                .get_one::<i64>(auth::ARG_SESSION_TIMEOUT_SECONDS)
                .copied()
                .filter(|seconds| *seconds > 0)
                .unwrap_or(1800),
        }));
    }

    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port,
        storage,
        frontend_base_url: auth_opts.frontend_base_url,
        token_secret: auth_opts.token_secret,
        session_timeout_seconds: auth_opts.session_timeout_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        bearer_token_ttl_seconds: auth_opts.bearer_token_ttl_seconds,
        password_min_length: auth_opts.password_min_length,
        trust_proxy_headers: auth_opts.trust_proxy_headers,
        providers: oauth::parse(matches)?,
        email_outbox_max_attempts: auth_opts.email_outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.email_outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.email_outbox.backoff_max_seconds,
    }))
}
