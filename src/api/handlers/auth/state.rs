//! Auth configuration and the shared state wiring the components together.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    clock::{Clock, SystemClock},
    credentials::CredentialStore,
    gateway::AuthGateway,
    oauth::{IdentityVerifier, OAuthBridge, OAuthProvider},
    password::{DEFAULT_MIN_LENGTH, PasswordPolicy},
    password_reset::{PasswordResetManager, ResetNotifier},
    rate_limit::{NoopRateLimiter, RateLimiter},
    session::SessionManager,
    token::{DEFAULT_BEARER_TTL_SECONDS, TokenCodec},
};
use crate::api::handlers::tenants::TenantService;
use crate::model::Account;
use crate::store::{AccountStore, SessionStore, StoreFuture, TenantStore};

const DEFAULT_SESSION_TIMEOUT_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 2 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_timeout_seconds: i64,
    reset_token_ttl_seconds: i64,
    bearer_token_ttl_seconds: i64,
    password_min_length: usize,
    trust_proxy_headers: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            session_timeout_seconds: DEFAULT_SESSION_TIMEOUT_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            bearer_token_ttl_seconds: DEFAULT_BEARER_TTL_SECONDS,
            password_min_length: DEFAULT_MIN_LENGTH,
            trust_proxy_headers: false,
        }
    }

    #[must_use]
    pub fn with_session_timeout_seconds(mut self, seconds: i64) -> Self {
        self.session_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bearer_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.bearer_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_password_min_length(mut self, length: usize) -> Self {
        self.password_min_length = length;
        self
    }

    /// Take the client IP from `x-real-ip`/`x-forwarded-for` instead of the
    /// socket peer. Only safe behind a proxy that overwrites those headers.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn session_timeout_seconds(&self) -> i64 {
        self.session_timeout_seconds
    }

    #[must_use]
    pub fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    #[must_use]
    pub fn bearer_token_ttl_seconds(&self) -> i64 {
        self.bearer_token_ttl_seconds
    }

    #[must_use]
    pub fn password_min_length(&self) -> usize {
        self.password_min_length
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// Optional callback run after a successful signup (pending invites and the
/// like). A failure is logged; the signup stands.
pub trait SignupHook: Send + Sync {
    fn after_signup<'a>(&'a self, account: &'a Account) -> StoreFuture<'a, ()>;
}

pub struct AuthStores {
    pub accounts: Arc<dyn AccountStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub tenants: Arc<dyn TenantStore>,
}

/// Collaborators with sensible defaults; override with the `with_*` methods.
pub struct AuthCollaborators {
    rate_limiter: Arc<dyn RateLimiter>,
    notifier: Arc<dyn ResetNotifier>,
    clock: Arc<dyn Clock>,
    verifiers: HashMap<OAuthProvider, Arc<dyn IdentityVerifier>>,
    signup_hook: Option<Arc<dyn SignupHook>>,
}

impl AuthCollaborators {
    pub fn new(notifier: Arc<dyn ResetNotifier>) -> Self {
        Self {
            rate_limiter: Arc::new(NoopRateLimiter),
            notifier,
            clock: Arc::new(SystemClock),
            verifiers: HashMap::new(),
            signup_hook: None,
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_verifier(mut self, provider: OAuthProvider, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifiers.insert(provider, verifier);
        self
    }

    #[must_use]
    pub fn with_signup_hook(mut self, hook: Arc<dyn SignupHook>) -> Self {
        self.signup_hook = Some(hook);
        self
    }
}

pub struct AuthState {
    config: AuthConfig,
    credentials: Arc<CredentialStore>,
    sessions: Arc<SessionManager>,
    resets: PasswordResetManager,
    oauth: OAuthBridge,
    gateway: AuthGateway,
    tenants: TenantService,
    signup_hook: Option<Arc<dyn SignupHook>>,
}

impl AuthState {
    pub fn new(
        config: AuthConfig,
        stores: AuthStores,
        codec: TokenCodec,
        collaborators: AuthCollaborators,
    ) -> Self {
        let AuthCollaborators {
            rate_limiter,
            notifier,
            clock,
            verifiers,
            signup_hook,
        } = collaborators;

        let credentials = Arc::new(CredentialStore::new(
            stores.accounts.clone(),
            PasswordPolicy::new(config.password_min_length()),
            clock.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            credentials.clone(),
            stores.sessions,
            Arc::new(codec),
            clock.clone(),
            Duration::seconds(config.session_timeout_seconds()),
        ));
        let resets = PasswordResetManager::new(
            credentials.clone(),
            notifier,
            clock.clone(),
            Duration::seconds(config.reset_token_ttl_seconds()),
            config.frontend_base_url().to_string(),
        );
        let oauth = OAuthBridge::new(credentials.clone(), verifiers);
        let gateway = AuthGateway::new(rate_limiter, sessions.clone());
        let tenants = TenantService::new(stores.tenants, stores.accounts, clock);

        Self {
            config,
            credentials,
            sessions,
            resets,
            oauth,
            gateway,
            tenants,
            signup_hook,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn resets(&self) -> &PasswordResetManager {
        &self.resets
    }

    #[must_use]
    pub fn oauth(&self) -> &OAuthBridge {
        &self.oauth
    }

    #[must_use]
    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    #[must_use]
    pub fn tenants(&self) -> &TenantService {
        &self.tenants
    }

    pub(crate) fn signup_hook(&self) -> Option<&dyn SignupHook> {
        self.signup_hook.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::AuthConfig;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://warden.dev".to_string());
        assert_eq!(config.frontend_base_url(), "https://warden.dev");
        assert_eq!(config.session_timeout_seconds(), 1800);
        assert_eq!(config.reset_token_ttl_seconds(), 7200);
        assert_eq!(config.bearer_token_ttl_seconds(), 432_000);
        assert_eq!(config.password_min_length(), 8);
        assert!(config.session_cookie_secure());
        assert!(!config.trust_proxy_headers());

        let config = AuthConfig::new("http://localhost:3000".to_string())
            .with_session_timeout_seconds(60)
            .with_reset_token_ttl_seconds(120)
            .with_bearer_token_ttl_seconds(3600)
            .with_password_min_length(12)
            .with_trust_proxy_headers(true);
        assert_eq!(config.session_timeout_seconds(), 60);
        assert_eq!(config.reset_token_ttl_seconds(), 120);
        assert_eq!(config.bearer_token_ttl_seconds(), 3600);
        assert_eq!(config.password_min_length(), 12);
        assert!(!config.session_cookie_secure());
        assert!(config.trust_proxy_headers());
    }
}
