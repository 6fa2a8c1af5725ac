//! OAuth bridge: third-party identity assertions to local accounts.
//!
//! Flow Overview: a provider-specific [`IdentityVerifier`] checks the assertion
//! (signature, audience, issuer) and yields [`OAuthClaims`]; `find_or_create`
//! maps them to an account by email. Existing accounts are returned as they
//! are, provider fields are never re-bound.

use anyhow::Context;
use std::{collections::HashMap, fmt, future::Future, pin::Pin, sync::Arc};
use tracing::info;

use super::{
    credentials::{CredentialStore, NewAccount},
    error::{AuthError, AuthFailure, AuthResult},
    utils::{generate_token, normalize_email},
};
use crate::model::Account;
use crate::store::InsertOutcome;

pub type VerifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<OAuthClaims, VerificationError>> + Send + 'a>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    Apple,
    Facebook,
}

impl OAuthProvider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Apple => "Apple",
            Self::Facebook => "Facebook",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity as asserted by a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OAuthClaims {
    pub sub: String,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct VerificationError(pub String);

impl From<VerificationError> for AuthError {
    fn from(err: VerificationError) -> Self {
        Self::ExternalVerification(err.0)
    }
}

pub trait IdentityVerifier: Send + Sync {
    fn verify<'a>(&'a self, assertion: &'a str) -> VerifyFuture<'a>;
}

pub struct OAuthBridge {
    credentials: Arc<CredentialStore>,
    verifiers: HashMap<OAuthProvider, Arc<dyn IdentityVerifier>>,
}

impl OAuthBridge {
    pub fn new(
        credentials: Arc<CredentialStore>,
        verifiers: HashMap<OAuthProvider, Arc<dyn IdentityVerifier>>,
    ) -> Self {
        Self {
            credentials,
            verifiers,
        }
    }

    #[must_use]
    pub fn is_enabled(&self, provider: OAuthProvider) -> bool {
        self.verifiers.contains_key(&provider)
    }

    pub async fn verify(&self, provider: OAuthProvider, assertion: &str) -> AuthResult<OAuthClaims> {
        let Some(verifier) = self.verifiers.get(&provider) else {
            return Err(AuthError::ExternalVerification(format!(
                "{provider} sign-in is not configured"
            )));
        };
        if assertion.trim().is_empty() {
            return Err(AuthError::ExternalVerification(format!(
                "empty {provider} assertion"
            )));
        }
        Ok(verifier.verify(assertion.trim()).await?)
    }

    /// Verify the assertion and resolve it to an ACTIVE account.
    pub async fn sign_in(&self, provider: OAuthProvider, assertion: &str) -> AuthResult<Account> {
        let claims = self.verify(provider, assertion).await?;
        let account = self.find_or_create(provider, &claims).await?;
        if !account.is_active() {
            return Err(AuthError::Unauthenticated(AuthFailure::AccountNotActive(
                account.status,
            )));
        }
        Ok(account)
    }

    /// Idempotent: the same claims always resolve to the same account.
    pub async fn find_or_create(&self, provider: OAuthProvider, claims: &OAuthClaims) -> AuthResult<Account> {
        let email = account_email(provider, claims)?;
        if let Some(account) = self.lookup(&email).await? {
            return Ok(account);
        }

        // Random password nobody knows; keeps the credential invariant.
        let new_account = NewAccount {
            first_name: claims.given_name.clone().unwrap_or_default(),
            last_name: claims.family_name.clone().unwrap_or_default(),
            email: email.clone(),
            password: generate_token()?,
            provider: Some(provider.as_str().to_string()),
            oauth_sub: Some(claims.sub.clone()),
        };
        match self.credentials.insert_new(new_account).await? {
            (InsertOutcome::Created, account) => {
                info!(account_id = %account.id, %provider, "account created from oauth identity");
                Ok(account)
            }
            // Lost a race with a concurrent first sign-in, or the email belongs
            // to a soft-deleted account.
            (InsertOutcome::Conflict, _) => self
                .lookup(&email)
                .await?
                .ok_or(AuthError::Unauthenticated(AuthFailure::UnknownAccount)),
        }
    }

    async fn lookup(&self, email: &str) -> AuthResult<Option<Account>> {
        Ok(self
            .credentials
            .accounts()
            .find_by_email(email)
            .await
            .context("failed to lookup oauth account")?)
    }
}

/// The local email for a provider identity. Facebook identities always get
/// the synthetic `<id>@facebook.com` address, so they never attach to an
/// existing password account that happens to share the disclosed email.
fn account_email(provider: OAuthProvider, claims: &OAuthClaims) -> AuthResult<String> {
    if provider == OAuthProvider::Facebook {
        let sub = claims.sub.trim();
        if sub.is_empty() {
            return Err(AuthError::ExternalVerification(
                "Facebook identity has no user id".to_string(),
            ));
        }
        return Ok(normalize_email(&format!("{sub}@facebook.com")));
    }
    claims
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|email| !email.is_empty())
        .ok_or_else(|| {
            AuthError::ExternalVerification(format!(
                "{provider} identity did not disclose an email"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{Harness, StaticVerifier};

    fn google_claims() -> OAuthClaims {
        OAuthClaims {
            sub: "google-123".to_string(),
            email: Some("Grace@Example.com".to_string()),
            given_name: Some("Grace".to_string()),
            family_name: Some("Hopper".to_string()),
        }
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let bridge = harness.state.oauth();
        let first = bridge.find_or_create(OAuthProvider::Google, &google_claims()).await?;
        let second = bridge.find_or_create(OAuthProvider::Google, &google_claims()).await?;
        assert_eq!(first.id, second.id);
        assert_eq!(first.email, "grace@example.com");
        assert_eq!(first.provider.as_deref(), Some("Google"));
        assert_eq!(first.oauth_sub.as_deref(), Some("google-123"));
        assert!(first.password_hash.is_some());
        assert!(first.is_active());
        Ok(())
    }

    #[tokio::test]
    async fn existing_account_is_not_rebound() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let existing = harness.register("grace@example.com").await?;
        let account = harness
            .state
            .oauth()
            .find_or_create(OAuthProvider::Google, &google_claims())
            .await?;
        assert_eq!(account.id, existing.id);
        assert_eq!(account.provider, None);
        assert_eq!(account.oauth_sub, None);
        Ok(())
    }

    #[tokio::test]
    async fn facebook_without_email_gets_synthetic_address() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let claims = OAuthClaims {
            sub: "998877".to_string(),
            ..OAuthClaims::default()
        };
        let bridge = harness.state.oauth();
        let first = bridge.find_or_create(OAuthProvider::Facebook, &claims).await?;
        let second = bridge.find_or_create(OAuthProvider::Facebook, &claims).await?;
        assert_eq!(first.email, "998877@facebook.com");
        assert_eq!(first.id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn facebook_never_attaches_to_an_existing_email() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let existing = harness.register("victim@example.com").await?;
        let claims = OAuthClaims {
            sub: "555".to_string(),
            email: Some("victim@example.com".to_string()),
            ..OAuthClaims::default()
        };
        let account = harness
            .state
            .oauth()
            .find_or_create(OAuthProvider::Facebook, &claims)
            .await?;
        assert_eq!(account.email, "555@facebook.com");
        assert_ne!(account.id, existing.id);
        assert_eq!(account.provider.as_deref(), Some("Facebook"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_email_is_a_verification_failure() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let claims = OAuthClaims {
            sub: "apple-1".to_string(),
            ..OAuthClaims::default()
        };
        let result = harness
            .state
            .oauth()
            .find_or_create(OAuthProvider::Apple, &claims)
            .await;
        assert!(matches!(result, Err(AuthError::ExternalVerification(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unconfigured_or_rejecting_provider_fails() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let bridge = harness.state.oauth();
        assert!(!bridge.is_enabled(OAuthProvider::Apple));
        assert!(matches!(
            bridge.sign_in(OAuthProvider::Apple, "token").await,
            Err(AuthError::ExternalVerification(_))
        ));
        assert!(matches!(
            bridge.sign_in(OAuthProvider::Google, StaticVerifier::REJECTED).await,
            Err(AuthError::ExternalVerification(_))
        ));
        let account = bridge.sign_in(OAuthProvider::Google, "grace").await?;
        assert_eq!(account.email, "grace@example.com");
        Ok(())
    }
}
