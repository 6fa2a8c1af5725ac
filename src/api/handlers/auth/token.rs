//! Bearer token codec (HS256).
//!
//! The token carries the account's API key, its name and email, and an absolute
//! `expires_at` (unix seconds). Expiry is checked by [`TokenCodec::is_valid`]
//! rather than by the JWT library so the caller can react to an expired token
//! (the session manager flips `signed_in` back to false).
//!
//! The signing secret is loaded once at startup; rotating it invalidates every
//! outstanding token.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::error::TokenError;
use crate::model::Account;

pub const MIN_SECRET_LENGTH: usize = 32;
pub const DEFAULT_BEARER_TTL_SECONDS: i64 = 5 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BearerClaims {
    pub user_key: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub email: String,
    pub expires_at: i64,
}

pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenCodec {
    /// Build a codec; the secret must be at least 32 characters.
    pub fn new(secret: &SecretString, ttl_seconds: i64) -> Result<Self> {
        let secret = secret.expose_secret();
        if secret.len() < MIN_SECRET_LENGTH {
            bail!("token secret must be at least {MIN_SECRET_LENGTH} characters");
        }
        if ttl_seconds <= 0 {
            bail!("bearer token ttl must be positive");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::seconds(ttl_seconds),
        })
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn encode(&self, account: &Account, now: DateTime<Utc>) -> Result<String> {
        let claims = BearerClaims {
            user_key: account.api_key.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            name: account.name(),
            email: account.email.clone(),
            expires_at: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .context("failed to sign bearer token")
    }

    /// Verify signature and structure. Says nothing about expiry.
    pub fn decode(&self, token: &str) -> Result<BearerClaims, TokenError> {
        let data = decode::<BearerClaims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }

    #[must_use]
    pub fn is_valid(claims: &BearerClaims, now: DateTime<Utc>) -> bool {
        now.timestamp() < claims.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn codec() -> Result<TokenCodec> {
        TokenCodec::new(
            &secret("0123456789abcdef0123456789abcdef"),
            DEFAULT_BEARER_TTL_SECONDS,
        )
    }

    fn account() -> Account {
        Account::new(
            "Ada".to_string(),
            "Lovelace".to_string(),
            "ada@example.com".to_string(),
            "api-key".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn short_secret_is_rejected() {
        assert!(TokenCodec::new(&secret("too-short"), 60).is_err());
    }

    #[test]
    fn decode_returns_embedded_claims() -> Result<()> {
        let codec = codec()?;
        let now = Utc::now();
        let token = codec.encode(&account(), now)?;
        let claims = codec.decode(&token)?;
        assert_eq!(claims.user_key, "api-key");
        assert_eq!(claims.name, "Ada Lovelace");
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.expires_at, (now + Duration::days(5)).timestamp());
        Ok(())
    }

    #[test]
    fn forged_token_fails_decode() -> Result<()> {
        let codec = codec()?;
        let other = TokenCodec::new(&secret("fedcba9876543210fedcba9876543210"), 60)?;
        let token = other.encode(&account(), Utc::now())?;
        assert!(matches!(codec.decode(&token), Err(TokenError::Invalid(_))));
        assert!(codec.decode("not.a.jwt").is_err());
        Ok(())
    }

    #[test]
    fn validity_is_strictly_before_expiry() -> Result<()> {
        let codec = codec()?;
        let now = Utc::now();
        let claims = codec.decode(&codec.encode(&account(), now)?)?;
        assert!(TokenCodec::is_valid(&claims, now));
        assert!(!TokenCodec::is_valid(&claims, now + Duration::days(5)));
        Ok(())
    }
}
