//! Credential store: password verification, password changes, API keys and
//! account registration.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    clock::Clock,
    error::{AuthError, AuthFailure, AuthResult, ValidationErrors},
    password::{PasswordPolicy, hash_password, verify_password},
    utils::{generate_token, normalize_email, valid_email},
};
use crate::model::Account;
use crate::store::{AccountStore, InsertOutcome};

/// Upper bound on API key redraws before giving up.
const API_KEY_ATTEMPTS: usize = 8;

/// Signup form as submitted by the caller.
#[derive(Clone, Debug, Default)]
pub struct SignupInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

/// An account about to be inserted, before it has an API key.
#[derive(Clone, Debug)]
pub(crate) struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub provider: Option<String>,
    pub oauth_sub: Option<String>,
}

pub struct CredentialStore {
    accounts: Arc<dyn AccountStore>,
    policy: PasswordPolicy,
    clock: Arc<dyn Clock>,
    dummy_hash: OnceCell<String>,
}

impl CredentialStore {
    pub fn new(accounts: Arc<dyn AccountStore>, policy: PasswordPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts,
            policy,
            clock,
            dummy_hash: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> PasswordPolicy {
        self.policy
    }

    pub(crate) fn accounts(&self) -> &dyn AccountStore {
        self.accounts.as_ref()
    }

    /// Check an email/password pair among non-deleted accounts.
    ///
    /// `NotFound` and `WrongPassword` stay distinct here for the audit log; the
    /// response layer renders both identically.
    pub async fn verify(&self, email: &str, password: &str) -> AuthResult<Account> {
        let email = normalize_email(email);
        let account = self
            .accounts
            .find_by_email(&email)
            .await
            .context("failed to lookup account for sign in")?;

        let Some(account) = account else {
            // Burn one hash so unknown emails cost the same as known ones.
            let dummy = self
                .dummy_hash
                .get_or_try_init(|| hash_password("warden-dummy-password").map(|hashed| hashed.hash))?;
            let _ = verify_password(password, dummy);
            return Err(AuthError::Unauthenticated(AuthFailure::NotFound));
        };

        let Some(stored_hash) = account.password_hash.as_deref() else {
            return Err(AuthError::Unauthenticated(AuthFailure::NoPasswordCredential));
        };
        if !verify_password(password, stored_hash) {
            return Err(AuthError::Unauthenticated(AuthFailure::WrongPassword));
        }
        Ok(account)
    }

    /// Validate strength, rehash with a fresh salt and persist.
    pub async fn set_password(&self, account: &mut Account, plaintext: &str) -> AuthResult<()> {
        self.check_strength(plaintext)?;
        apply_password(account, plaintext)?;
        account.updated_at = self.clock.now();
        self.accounts
            .update(account)
            .await
            .context("failed to store new password")?;
        Ok(())
    }

    pub(crate) fn check_strength(&self, plaintext: &str) -> AuthResult<()> {
        let mut errors = ValidationErrors::new();
        for violation in self.policy.violations(plaintext) {
            errors.add("password", violation);
        }
        errors.into_result()
    }

    /// Draw API keys until one is unused by every account, deleted ones included.
    pub async fn issue_api_key(&self, account: &mut Account) -> Result<()> {
        for _ in 0..API_KEY_ATTEMPTS {
            let candidate = generate_token()?;
            if !self.accounts.api_key_taken(&candidate).await? {
                account.api_key = candidate;
                return Ok(());
            }
            debug!("api key collision, drawing again");
        }
        anyhow::bail!("failed to draw a unique api key after {API_KEY_ATTEMPTS} attempts")
    }

    /// Signup with field validation. The new account is ACTIVE and a member.
    pub async fn register(&self, input: SignupInput) -> AuthResult<Account> {
        let email = normalize_email(&input.email);
        let mut errors = ValidationErrors::new();
        if input.first_name.trim().is_empty() {
            errors.add("first_name", "can't be blank");
        }
        if input.last_name.trim().is_empty() {
            errors.add("last_name", "can't be blank");
        }
        if email.is_empty() {
            errors.add("email", "can't be blank");
        } else if !valid_email(&email) {
            errors.add("email", "is invalid");
        }
        if input.password.is_empty() {
            errors.add("password", "can't be blank");
        } else {
            for violation in self.policy.violations(&input.password) {
                errors.add("password", violation);
            }
        }
        if input.password != input.password_confirmation {
            errors.add("password_confirmation", "doesn't match Password");
        }
        errors.into_result()?;

        let new_account = NewAccount {
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            email,
            password: input.password,
            provider: None,
            oauth_sub: None,
        };
        match self.insert_new(new_account).await? {
            (InsertOutcome::Created, account) => {
                info!(account_id = %account.id, "account registered");
                Ok(account)
            }
            (InsertOutcome::Conflict, _) => Err(AuthError::Validation(ValidationErrors::single(
                "email",
                "has already been taken",
            ))),
        }
    }

    /// Hash, assign an API key and insert. Strength is the caller's concern.
    pub(crate) async fn insert_new(&self, new_account: NewAccount) -> Result<(InsertOutcome, Account)> {
        let now = self.clock.now();
        let mut account = Account::new(
            new_account.first_name,
            new_account.last_name,
            new_account.email,
            String::new(),
            now,
        );
        account.provider = new_account.provider;
        account.oauth_sub = new_account.oauth_sub;
        apply_password(&mut account, &new_account.password)?;
        self.issue_api_key(&mut account).await?;

        let outcome = self
            .accounts
            .insert(&account)
            .await
            .context("failed to insert account")?;
        Ok((outcome, account))
    }
}

fn apply_password(account: &mut Account, plaintext: &str) -> Result<()> {
    let hashed = hash_password(plaintext)?;
    account.password_hash = Some(hashed.hash);
    account.password_salt = Some(hashed.salt);
    Ok(())
}
