use crate::api::handlers::auth::{FacebookApp, ProviderConfig};
use anyhow::bail;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_APPLE_CLIENT_ID: &str = "apple-client-id";
pub const ARG_FACEBOOK_APP_ID: &str = "facebook-app-id";
pub const ARG_FACEBOOK_APP_SECRET: &str = "facebook-app-secret";

/// Unset client ids disable the provider.
///
/// # Errors
/// Returns an error if only one of the Facebook app id and secret is given.
pub fn parse(matches: &ArgMatches) -> anyhow::Result<ProviderConfig> {
    let get_non_empty = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .filter(|v| !v.trim().is_empty())
    };

    let facebook = match (
        get_non_empty(ARG_FACEBOOK_APP_ID),
        get_non_empty(ARG_FACEBOOK_APP_SECRET),
    ) {
        (Some(app_id), Some(secret)) => Some(FacebookApp {
            app_id,
            app_secret: SecretString::from(secret),
        }),
        (None, None) => None,
        _ => bail!("--{ARG_FACEBOOK_APP_ID} and --{ARG_FACEBOOK_APP_SECRET} go together"),
    };

    Ok(ProviderConfig {
        google_client_id: get_non_empty(ARG_GOOGLE_CLIENT_ID),
        apple_client_id: get_non_empty(ARG_APPLE_CLIENT_ID),
        facebook,
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id; enables Google sign-in")
                .env("WARDEN_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_APPLE_CLIENT_ID)
                .long(ARG_APPLE_CLIENT_ID)
                .help("Apple services id; enables Sign in with Apple")
                .env("WARDEN_APPLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_FACEBOOK_APP_ID)
                .long(ARG_FACEBOOK_APP_ID)
                .help("Facebook app id; with the app secret, enables Facebook sign-in")
                .env("WARDEN_FACEBOOK_APP_ID"),
        )
        .arg(
            Arg::new(ARG_FACEBOOK_APP_SECRET)
                .long(ARG_FACEBOOK_APP_SECRET)
                .help("Facebook app secret used to inspect access tokens")
                .env("WARDEN_FACEBOOK_APP_SECRET")
                .hide_env_values(true),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn parse_from(args: &[&str]) -> anyhow::Result<ProviderConfig> {
        let command = with_args(Command::new("warden"));
        let matches =
            command.try_get_matches_from(std::iter::once("warden").chain(args.iter().copied()))?;
        parse(&matches)
    }

    fn without_provider_env<R>(f: impl FnOnce() -> R) -> R {
        temp_env::with_vars(
            [
                ("WARDEN_GOOGLE_CLIENT_ID", None::<&str>),
                ("WARDEN_APPLE_CLIENT_ID", None),
                ("WARDEN_FACEBOOK_APP_ID", None),
                ("WARDEN_FACEBOOK_APP_SECRET", None),
            ],
            f,
        )
    }

    #[test]
    fn providers_are_off_by_default() -> anyhow::Result<()> {
        without_provider_env(|| {
            let config = parse_from(&[])?;
            assert_eq!(config.google_client_id, None);
            assert_eq!(config.apple_client_id, None);
            assert!(config.facebook.is_none());
            Ok(())
        })
    }

    #[test]
    fn providers_from_env() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("WARDEN_GOOGLE_CLIENT_ID", Some("google-client")),
                ("WARDEN_APPLE_CLIENT_ID", Some(" ")),
                ("WARDEN_FACEBOOK_APP_ID", Some("1234")),
                ("WARDEN_FACEBOOK_APP_SECRET", Some("app-secret")),
            ],
            || {
                let config = parse_from(&[])?;
                assert_eq!(config.google_client_id.as_deref(), Some("google-client"));
                assert_eq!(config.apple_client_id, None);
                let facebook = config.facebook.as_ref();
                assert_eq!(facebook.map(|app| app.app_id.as_str()), Some("1234"));
                assert_eq!(
                    facebook.map(|app| app.app_secret.expose_secret()),
                    Some("app-secret")
                );
                Ok(())
            },
        )
    }

    #[test]
    fn facebook_needs_both_app_id_and_secret() {
        without_provider_env(|| {
            let err = parse_from(&["--facebook-app-id", "1234"])
                .err()
                .map(|e| e.to_string());
            assert!(err.is_some_and(|message| message.contains("--facebook-app-secret")));
        });
    }
}
