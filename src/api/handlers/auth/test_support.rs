//! Shared fixtures for auth tests: in-memory stores, a manual clock and
//! recording collaborators.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use secrecy::SecretString;
use std::sync::{Arc, Mutex};

use super::{
    AuthCollaborators, AuthConfig, AuthState, AuthStores, WindowRateLimiter,
    clock::ManualClock,
    credentials::SignupInput,
    oauth::{IdentityVerifier, OAuthClaims, OAuthProvider, VerificationError, VerifyFuture},
    password_reset::ResetNotifier,
    token::TokenCodec,
};
use crate::model::{Account, Role};
use crate::store::{
    AccountStore,
    memory::{MemoryAccountStore, MemoryCounterStore, MemorySessionStore, MemoryTenantStore},
};

pub const STRONG_PASSWORD: &str = "Abcdef1!";
pub const TOKEN_SECRET: &str = "test-secret-test-secret-test-secret!";

#[derive(Clone, Debug)]
pub struct SentReset {
    pub email: String,
    pub token: String,
    pub reset_url: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentReset>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentReset> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn last_token(&self) -> Option<String> {
        self.sent().last().map(|sent| sent.token.clone())
    }
}

impl ResetNotifier for RecordingNotifier {
    fn notify(&self, account: &Account, token: &str, reset_url: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentReset {
                email: account.email.clone(),
                token: token.to_string(),
                reset_url: reset_url.to_string(),
            });
        }
    }
}

/// Accepts any assertion except [`StaticVerifier::REJECTED`] and derives the
/// identity from it.
pub struct StaticVerifier;

impl StaticVerifier {
    pub const REJECTED: &'static str = "rejected";
}

impl IdentityVerifier for StaticVerifier {
    fn verify<'a>(&'a self, assertion: &'a str) -> VerifyFuture<'a> {
        Box::pin(async move {
            if assertion == Self::REJECTED {
                return Err(VerificationError("signature mismatch".to_string()));
            }
            Ok(OAuthClaims {
                sub: format!("static-{assertion}"),
                email: Some(format!("{assertion}@example.com")),
                given_name: Some(assertion.to_string()),
                family_name: Some("Tester".to_string()),
            })
        })
    }
}

pub struct Harness {
    pub state: Arc<AuthState>,
    pub accounts: Arc<MemoryAccountStore>,
    pub tenants: Arc<MemoryTenantStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_config(AuthConfig::new("https://warden.dev".to_string()))
    }

    pub fn with_config(config: AuthConfig) -> Result<Self> {
        // 2024-01-01T00:00:00Z, aligned to every rate-limit period.
        let start = Utc
            .timestamp_opt(1_704_067_200, 0)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid start timestamp"))?;
        let clock = Arc::new(ManualClock::new(start));
        let accounts = Arc::new(MemoryAccountStore::new());
        let tenants = Arc::new(MemoryTenantStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let codec = TokenCodec::new(
            &SecretString::from(TOKEN_SECRET.to_string()),
            config.bearer_token_ttl_seconds(),
        )?;
        let stores = AuthStores {
            accounts: accounts.clone(),
            sessions: Arc::new(MemorySessionStore::new()),
            tenants: tenants.clone(),
        };
        let collaborators = AuthCollaborators::new(notifier.clone())
            .with_clock(clock.clone())
            .with_rate_limiter(Arc::new(WindowRateLimiter::new(
                Arc::new(MemoryCounterStore::new()),
                clock.clone(),
            )))
            .with_verifier(OAuthProvider::Google, Arc::new(StaticVerifier))
            .with_verifier(OAuthProvider::Facebook, Arc::new(StaticVerifier));

        Ok(Self {
            state: Arc::new(AuthState::new(config, stores, codec, collaborators)),
            accounts,
            tenants,
            clock,
            notifier,
        })
    }

    /// Register an ACTIVE member with [`STRONG_PASSWORD`].
    pub async fn register(&self, email: &str) -> Result<Account> {
        let account = self
            .state
            .credentials()
            .register(SignupInput {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: email.to_string(),
                password: STRONG_PASSWORD.to_string(),
                password_confirmation: STRONG_PASSWORD.to_string(),
            })
            .await?;
        Ok(account)
    }

    pub async fn super_admin(&self, email: &str) -> Result<Account> {
        let mut account = self.register(email).await?;
        account.role = Role::SuperAdmin;
        self.accounts.update(&account).await?;
        Ok(account)
    }
}
