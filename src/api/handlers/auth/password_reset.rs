//! Password-reset token lifecycle.
//!
//! Only the SHA-256 digest of a reset token is stored on the account, next to
//! its issuance time. A token is valid for the configured window (2h by
//! default), single-use, and issuing a new one replaces the previous one.

use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    clock::Clock,
    credentials::CredentialStore,
    error::{AuthError, AuthResult},
    utils::{build_reset_url, digest_token, generate_token, normalize_email},
};
use crate::model::{Account, AccountStatus};

/// Hand-off to email delivery. Must not block on delivery.
pub trait ResetNotifier: Send + Sync {
    fn notify(&self, account: &Account, token: &str, reset_url: &str);
}

pub struct PasswordResetManager {
    credentials: Arc<CredentialStore>,
    notifier: Arc<dyn ResetNotifier>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    frontend_base_url: String,
}

impl PasswordResetManager {
    pub fn new(
        credentials: Arc<CredentialStore>,
        notifier: Arc<dyn ResetNotifier>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        frontend_base_url: String,
    ) -> Self {
        Self {
            credentials,
            notifier,
            clock,
            ttl,
            frontend_base_url,
        }
    }

    /// Issue a token when the email belongs to a live account. The outcome is
    /// never revealed to the caller.
    pub async fn request(&self, email: &str) -> AuthResult<()> {
        let email = normalize_email(email);
        let account = self
            .credentials
            .accounts()
            .find_by_email(&email)
            .await
            .context("failed to lookup account for password reset")?;
        let Some(mut account) = account else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };

        let token = generate_token()?;
        let now = self.clock.now();
        account.password_reset_digest = Some(digest_token(&token));
        account.password_reset_sent_at = Some(now);
        account.updated_at = now;
        self.credentials
            .accounts()
            .update(&account)
            .await
            .context("failed to store reset token")?;

        let reset_url = build_reset_url(&self.frontend_base_url, &token);
        self.notifier.notify(&account, &token, &reset_url);
        info!(account_id = %account.id, "password reset token issued");
        Ok(())
    }

    /// The account owning a live token.
    pub async fn validate(&self, token: &str) -> AuthResult<Account> {
        if token.trim().is_empty() {
            return Err(AuthError::ResetTokenInvalid);
        }
        let account = self
            .credentials
            .accounts()
            .find_by_reset_digest(&digest_token(token))
            .await
            .context("failed to lookup reset token")?;
        let Some(account) = account else {
            return Err(AuthError::ResetTokenInvalid);
        };
        match account.password_reset_sent_at {
            Some(sent_at) if sent_at + self.ttl >= self.clock.now() => Ok(account),
            _ => Err(AuthError::ResetTokenInvalid),
        }
    }

    /// Set a new password with a live token.
    ///
    /// A confirmation mismatch or a weak password leaves the token in place so
    /// the caller can retry. On success the token is cleared and the account
    /// becomes ACTIVE.
    pub async fn consume(
        &self,
        token: &str,
        new_password: &str,
        confirmation: &str,
    ) -> AuthResult<Account> {
        if new_password != confirmation {
            return Err(AuthError::PasswordMismatch);
        }
        let mut account = self.validate(token).await?;
        self.credentials.check_strength(new_password)?;

        account.clear_reset_token();
        account.status = AccountStatus::Active;
        self.credentials.set_password(&mut account, new_password).await?;
        info!(account_id = %account.id, "password reset completed");
        Ok(account)
    }
}
