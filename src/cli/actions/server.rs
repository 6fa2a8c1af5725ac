use crate::{
    api::{self, email::EmailWorkerConfig, handlers::auth::{AuthConfig, ProviderConfig}},
    store::StorageConfig,
};
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub storage: StorageConfig,
    pub frontend_base_url: String,
    pub token_secret: SecretString,
    pub session_timeout_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub bearer_token_ttl_seconds: i64,
    pub password_min_length: usize,
    pub trust_proxy_headers: bool,
    pub providers: ProviderConfig,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_session_timeout_seconds(self.session_timeout_seconds)
            .with_reset_token_ttl_seconds(self.reset_token_ttl_seconds)
            .with_bearer_token_ttl_seconds(self.bearer_token_ttl_seconds)
            .with_password_min_length(self.password_min_length)
            .with_trust_proxy_headers(self.trust_proxy_headers)
    }

    fn email_config(&self) -> EmailWorkerConfig {
        EmailWorkerConfig::new()
            .with_max_attempts(self.email_outbox_max_attempts)
            .with_backoff_base_seconds(self.email_outbox_backoff_base_seconds)
            .with_backoff_max_seconds(self.email_outbox_backoff_max_seconds)
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the stores cannot be opened or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        store = args.storage.store.as_str(),
        rate_limit_store = args.storage.rate_limit_store.as_str(),
        frontend_base_url = %args.frontend_base_url,
        trust_proxy_headers = args.trust_proxy_headers,
        "starting server"
    );

    let auth_config = args.auth_config();
    let email_config = args.email_config();

    api::new(
        args.port,
        args.storage,
        auth_config,
        &args.token_secret,
        &args.providers,
        email_config,
    )
    .await
}
