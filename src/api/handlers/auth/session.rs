//! Session manager for cookie and bearer flows.
//!
//! Flow Overview:
//! - Cookie: `sign_in` verifies credentials and stores the digest of a random
//!   session id. Each request presenting the cookie slides `last_refresh`
//!   forward while `last_refresh + timeout >= now`; a stale session is deleted
//!   and the request is anonymous again.
//! - Bearer: `issue_bearer` marks the account `signed_in` and signs a token.
//!   An expired token flips `signed_in` back to false; sign-out does the same
//!   and thereby revokes every outstanding token of the account.
//!
//! The account is always re-fetched by API key; nothing else about it is kept
//! in the session.

use anyhow::Context;
use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    clock::Clock,
    credentials::CredentialStore,
    error::{AuthError, AuthFailure, AuthResult, TokenError},
    state::AuthConfig,
    token::TokenCodec,
    utils::{digest_token, generate_token},
};
use crate::model::Account;
use crate::store::{InsertOutcome, SessionRecord, SessionStore};

pub const SESSION_COOKIE_NAME: &str = "warden_session";

const SESSION_INSERT_ATTEMPTS: usize = 3;

/// A freshly started cookie session. `token` is the raw cookie value.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub account: Account,
    pub token: String,
}

pub struct SessionManager {
    credentials: Arc<CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(
        credentials: Arc<CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        codec: Arc<TokenCodec>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            sessions,
            codec,
            clock,
            timeout,
        }
    }

    /// Verify credentials and require an ACTIVE account. Every failure is the
    /// same generic error to the caller.
    pub async fn authenticate_credentials(&self, email: &str, password: &str) -> AuthResult<Account> {
        let account = self.credentials.verify(email, password).await?;
        if !account.is_active() {
            return Err(AuthError::Unauthenticated(AuthFailure::AccountNotActive(
                account.status,
            )));
        }
        Ok(account)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<IssuedSession> {
        let account = self.authenticate_credentials(email, password).await?;
        let session = self.start_session(account).await?;
        info!(account_id = %session.account.id, "signed in");
        Ok(session)
    }

    /// Open a session for an already authenticated account.
    pub async fn start_session(&self, account: Account) -> AuthResult<IssuedSession> {
        let now = self.clock.now();
        let record = SessionRecord {
            account_key: account.api_key.clone(),
            issued_at: now,
            last_refresh: now,
        };
        for _ in 0..SESSION_INSERT_ATTEMPTS {
            let token = generate_token()?;
            let digest = digest_token(&token);
            match self.sessions.insert(&digest, &record).await? {
                InsertOutcome::Created => return Ok(IssuedSession { account, token }),
                InsertOutcome::Conflict => debug!("session id collision, drawing again"),
            }
        }
        Err(anyhow::anyhow!("failed to allocate a unique session id").into())
    }

    /// Resolve a cookie session, sliding its expiry on success.
    pub async fn authenticate_request(&self, token: Option<&str>) -> AuthResult<Account> {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            return Err(AuthError::Unauthenticated(AuthFailure::MissingCredentials));
        };
        let digest = digest_token(token);
        let Some(record) = self
            .sessions
            .find(&digest)
            .await
            .context("failed to lookup session")?
        else {
            return Err(AuthError::Unauthenticated(AuthFailure::UnknownSession));
        };

        let now = self.clock.now();
        if record.last_refresh + self.timeout < now {
            self.sessions.delete(&digest).await?;
            return Err(AuthError::Unauthenticated(AuthFailure::SessionExpired));
        }

        let account = self
            .credentials
            .accounts()
            .find_by_api_key(&record.account_key)
            .await
            .context("failed to load session account")?;
        let Some(account) = account.filter(Account::is_active) else {
            self.sessions.delete(&digest).await?;
            return Err(AuthError::Unauthenticated(AuthFailure::UnknownAccount));
        };

        self.sessions.touch(&digest, now).await?;
        Ok(account)
    }

    /// Drop the server-side session. Signing out twice is fine.
    pub async fn sign_out(&self, token: Option<&str>) -> AuthResult<()> {
        if let Some(token) = token.filter(|token| !token.is_empty()) {
            self.sessions.delete(&digest_token(token)).await?;
        }
        Ok(())
    }

    /// Mark the account signed in and sign a bearer token for it.
    pub async fn issue_bearer(&self, mut account: Account) -> AuthResult<(Account, String)> {
        let now = self.clock.now();
        account.signed_in = true;
        account.updated_at = now;
        self.credentials
            .accounts()
            .update(&account)
            .await
            .context("failed to mark account signed in")?;
        let token = self.codec.encode(&account, now)?;
        Ok((account, token))
    }

    pub async fn bearer_sign_in(&self, email: &str, password: &str) -> AuthResult<(Account, String)> {
        let account = self.authenticate_credentials(email, password).await?;
        let issued = self.issue_bearer(account).await?;
        info!(account_id = %issued.0.id, "bearer token issued");
        Ok(issued)
    }

    /// Resolve a bearer token to an ACTIVE, signed-in account.
    ///
    /// An expired token flips `signed_in` to false before rejecting.
    pub async fn authenticate_bearer(&self, token: &str) -> AuthResult<Account> {
        let claims = self.codec.decode(token)?;
        let account = self
            .credentials
            .accounts()
            .find_by_api_key(&claims.user_key)
            .await
            .context("failed to load bearer account")?;
        let Some(mut account) = account.filter(Account::is_active) else {
            return Err(AuthError::Unauthenticated(AuthFailure::UnknownAccount));
        };

        let now = self.clock.now();
        if !TokenCodec::is_valid(&claims, now) {
            if account.signed_in {
                account.signed_in = false;
                account.updated_at = now;
                self.credentials
                    .accounts()
                    .update(&account)
                    .await
                    .context("failed to clear signed_in after token expiry")?;
                info!(account_id = %account.id, "bearer token expired, account signed out");
            }
            return Err(AuthError::TokenDecode(TokenError::Expired));
        }
        if !account.signed_in {
            return Err(AuthError::Unauthenticated(AuthFailure::SignedOut));
        }
        Ok(account)
    }

    /// Revoke every outstanding bearer token of the account. Idempotent.
    pub async fn sign_out_bearer(&self, mut account: Account) -> AuthResult<()> {
        if account.signed_in {
            account.signed_in = false;
            account.updated_at = self.clock.now();
            self.credentials
                .accounts()
                .update(&account)
                .await
                .context("failed to sign out bearer sessions")?;
        }
        Ok(())
    }
}

/// `HttpOnly` session cookie. `Secure` only when the frontend is served over
/// HTTPS. No `Max-Age`: expiry is enforced server-side.
pub(crate) fn session_cookie(config: &AuthConfig, token: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{Harness, STRONG_PASSWORD};
    use crate::store::AccountStore;

    #[tokio::test]
    async fn sign_in_returns_identity_of_registered_account() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let account = harness.register("ada@example.com").await?;
        let session = harness
            .state
            .sessions()
            .sign_in("ada@example.com", STRONG_PASSWORD)
            .await?;
        assert_eq!(session.account.id, account.id);

        let resolved = harness
            .state
            .sessions()
            .authenticate_request(Some(&session.token))
            .await?;
        assert_eq!(resolved.id, account.id);
        Ok(())
    }

    #[tokio::test]
    async fn inactive_accounts_cannot_sign_in() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let mut account = harness.register("ada@example.com").await?;
        account.status = crate::model::AccountStatus::Banned;
        harness.accounts.update(&account).await?;

        let result = harness
            .state
            .sessions()
            .sign_in("ada@example.com", STRONG_PASSWORD)
            .await;
        assert!(matches!(
            result,
            Err(AuthError::Unauthenticated(AuthFailure::AccountNotActive(_)))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn activity_slides_expiry_and_idle_session_expires() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.register("ada@example.com").await?;
        let sessions = harness.state.sessions();
        let session = sessions.sign_in("ada@example.com", STRONG_PASSWORD).await?;

        // Twenty minutes, twice: each request slides the window.
        harness.clock.advance(Duration::minutes(20));
        sessions.authenticate_request(Some(&session.token)).await?;
        harness.clock.advance(Duration::minutes(20));
        sessions.authenticate_request(Some(&session.token)).await?;

        harness.clock.advance(Duration::minutes(31));
        let stale = sessions.authenticate_request(Some(&session.token)).await;
        assert!(matches!(
            stale,
            Err(AuthError::Unauthenticated(AuthFailure::SessionExpired))
        ));
        // Cleared, not just rejected.
        let again = sessions.authenticate_request(Some(&session.token)).await;
        assert!(matches!(
            again,
            Err(AuthError::Unauthenticated(AuthFailure::UnknownSession))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn sign_out_is_idempotent() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.register("ada@example.com").await?;
        let sessions = harness.state.sessions();
        let session = sessions.sign_in("ada@example.com", STRONG_PASSWORD).await?;

        sessions.sign_out(Some(&session.token)).await?;
        sessions.sign_out(Some(&session.token)).await?;
        sessions.sign_out(None).await?;
        assert!(sessions.authenticate_request(Some(&session.token)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn expired_bearer_flips_signed_in() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.register("ada@example.com").await?;
        let sessions = harness.state.sessions();
        let (account, token) = sessions.bearer_sign_in("ada@example.com", STRONG_PASSWORD).await?;
        assert!(account.signed_in);
        sessions.authenticate_bearer(&token).await?;

        harness.clock.advance(Duration::days(5));
        let expired = sessions.authenticate_bearer(&token).await;
        assert!(matches!(
            expired,
            Err(AuthError::TokenDecode(TokenError::Expired))
        ));
        let stored = harness.accounts.find_by_id(account.id).await?;
        assert_eq!(stored.map(|account| account.signed_in), Some(false));
        Ok(())
    }

    #[tokio::test]
    async fn bearer_sign_out_revokes_tokens() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.register("ada@example.com").await?;
        let sessions = harness.state.sessions();
        let (account, token) = sessions.bearer_sign_in("ada@example.com", STRONG_PASSWORD).await?;
        sessions.sign_out_bearer(account.clone()).await?;
        sessions.sign_out_bearer(account).await?;
        assert!(matches!(
            sessions.authenticate_bearer(&token).await,
            Err(AuthError::Unauthenticated(AuthFailure::SignedOut))
        ));
        Ok(())
    }

    #[test]
    fn cookie_helpers() -> anyhow::Result<()> {
        let config = AuthConfig::new("https://warden.dev".to_string());
        let cookie = session_cookie(&config, "abc")?;
        assert_eq!(
            cookie.to_str()?,
            "warden_session=abc; Path=/; HttpOnly; SameSite=Lax; Secure"
        );
        let insecure = AuthConfig::new("http://localhost:3000".to_string());
        assert!(!clear_session_cookie(&insecure)?.to_str()?.contains("Secure"));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; warden_session=xyz"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(extract_session_cookie(&headers), Some("xyz".to_string()));
        assert_eq!(extract_bearer_token(&headers), Some("tok".to_string()));
        Ok(())
    }
}
