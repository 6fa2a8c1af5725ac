//! Identity verifiers for Google, Apple and Facebook.
//!
//! Google and Apple issue RS256 ID tokens; they are checked against the
//! provider's published JWKS (cached for an hour) with issuer and audience
//! pinned. Facebook hands out opaque access tokens: `debug_token` (called
//! with our app credentials) proves the token was issued to this app, then
//! `/me` supplies the profile.

use anyhow::{Context, Result};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header, jwk::JwkSet};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::oauth::{IdentityVerifier, OAuthClaims, OAuthProvider, VerificationError, VerifyFuture};

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";
const APPLE_ISSUERS: [&str; 1] = ["https://appleid.apple.com"];
const FACEBOOK_ME_URL: &str = "https://graph.facebook.com/me";
const FACEBOOK_DEBUG_TOKEN_URL: &str = "https://graph.facebook.com/debug_token";
const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Unknown key ids force a refetch at most this often.
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    email: Option<String>,
    email_verified: Option<EmailVerified>,
    given_name: Option<String>,
    family_name: Option<String>,
}

/// Google sends a bool, Apple sometimes a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmailVerified {
    Bool(bool),
    Text(String),
}

impl EmailVerified {
    fn is_true(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => value.eq_ignore_ascii_case("true"),
        }
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(crate::APP_USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

/// Which providers are switched on. Google and Apple need the client id the
/// ID tokens are issued for; Facebook needs the app id and secret its access
/// tokens are checked against.
#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub google_client_id: Option<String>,
    pub apple_client_id: Option<String>,
    pub facebook: Option<FacebookApp>,
}

#[derive(Clone, Debug)]
pub struct FacebookApp {
    pub app_id: String,
    pub app_secret: SecretString,
}

impl ProviderConfig {
    /// Build a verifier for every enabled provider.
    ///
    /// # Errors
    /// Returns an error if an HTTP client cannot be built.
    pub fn verifiers(&self) -> Result<Vec<(OAuthProvider, Arc<dyn IdentityVerifier>)>> {
        let mut verifiers: Vec<(OAuthProvider, Arc<dyn IdentityVerifier>)> = Vec::new();
        if let Some(client_id) = &self.google_client_id {
            verifiers.push((
                OAuthProvider::Google,
                Arc::new(JwksVerifier::google(client_id.clone())?),
            ));
        }
        if let Some(client_id) = &self.apple_client_id {
            verifiers.push((
                OAuthProvider::Apple,
                Arc::new(JwksVerifier::apple(client_id.clone())?),
            ));
        }
        if let Some(app) = &self.facebook {
            verifiers.push((
                OAuthProvider::Facebook,
                Arc::new(FacebookVerifier::new(app.clone())?),
            ));
        }
        for (provider, _) in &verifiers {
            debug!(provider = %provider, "identity provider enabled");
        }
        Ok(verifiers)
    }
}

pub struct JwksVerifier {
    client_id: String,
    issuers: Vec<String>,
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<(JwkSet, Instant)>>,
}

impl JwksVerifier {
    pub fn google(client_id: String) -> Result<Self> {
        Self::new(client_id, &GOOGLE_ISSUERS, GOOGLE_JWKS_URL)
    }

    pub fn apple(client_id: String) -> Result<Self> {
        Self::new(client_id, &APPLE_ISSUERS, APPLE_JWKS_URL)
    }

    fn new(client_id: String, issuers: &[&str], jwks_url: &str) -> Result<Self> {
        Ok(Self {
            client_id,
            issuers: issuers.iter().map(ToString::to_string).collect(),
            jwks_url: jwks_url.to_string(),
            http: http_client()?,
            cache: RwLock::new(None),
        })
    }

    async fn keys(&self, refresh: bool) -> Result<JwkSet> {
        let fresh_for = if refresh { JWKS_MIN_REFRESH } else { JWKS_CACHE_TTL };
        if let Some((keys, fetched_at)) = self.cache.read().await.as_ref()
            && fetched_at.elapsed() < fresh_for
        {
            return Ok(keys.clone());
        }

        debug!(url = %self.jwks_url, "fetching jwks");
        let keys: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .context("failed to fetch jwks")?
            .error_for_status()
            .context("jwks endpoint returned an error")?
            .json()
            .await
            .context("failed to parse jwks")?;
        *self.cache.write().await = Some((keys.clone(), Instant::now()));
        Ok(keys)
    }

    async fn verify_id_token(&self, token: &str) -> Result<OAuthClaims, VerificationError> {
        let header =
            decode_header(token).map_err(|err| VerificationError(format!("malformed id token: {err}")))?;
        if header.alg != Algorithm::RS256 {
            return Err(VerificationError(format!(
                "unexpected id token algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| VerificationError("id token has no key id".to_string()))?;

        let mut keys = self.keys(false).await.map_err(unavailable)?;
        if keys.find(&kid).is_none() {
            // Providers rotate keys; one refetch before giving up, unless the
            // cache was refreshed moments ago.
            keys = self.keys(true).await.map_err(unavailable)?;
        }
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| VerificationError(format!("unknown signing key {kid}")))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|err| VerificationError(format!("unusable signing key: {err}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&self.issuers);
        let claims = decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|err| VerificationError(format!("id token rejected: {err}")))?
            .claims;

        if claims
            .email_verified
            .as_ref()
            .is_some_and(|verified| !verified.is_true())
        {
            return Err(VerificationError("email not verified by provider".to_string()));
        }

        Ok(OAuthClaims {
            sub: claims.sub,
            email: claims.email,
            given_name: claims.given_name,
            family_name: claims.family_name,
        })
    }
}

impl IdentityVerifier for JwksVerifier {
    fn verify<'a>(&'a self, assertion: &'a str) -> VerifyFuture<'a> {
        Box::pin(self.verify_id_token(assertion))
    }
}

#[derive(Debug, Deserialize)]
struct FacebookProfile {
    id: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

/// The email is left out on purpose: Facebook identities always map to the
/// synthetic `<id>@facebook.com` address.
impl From<FacebookProfile> for OAuthClaims {
    fn from(profile: FacebookProfile) -> Self {
        Self {
            sub: profile.id,
            email: None,
            given_name: profile.first_name,
            family_name: profile.last_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DebugTokenResponse {
    data: DebugTokenData,
}

#[derive(Debug, Default, Deserialize)]
struct DebugTokenData {
    app_id: Option<String>,
    is_valid: Option<bool>,
    user_id: Option<String>,
}

impl DebugTokenData {
    /// The Facebook user id, provided the token is live and was issued to
    /// `app_id`. Tokens minted for other apps are rejected.
    fn owner_for_app(self, app_id: &str) -> Result<String, VerificationError> {
        if self.is_valid != Some(true) {
            return Err(VerificationError("facebook access token is not valid".to_string()));
        }
        if self.app_id.as_deref() != Some(app_id) {
            return Err(VerificationError(
                "facebook access token was issued to another app".to_string(),
            ));
        }
        self.user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| VerificationError("facebook access token has no user".to_string()))
    }
}

pub struct FacebookVerifier {
    app: FacebookApp,
    me_url: String,
    debug_token_url: String,
    http: reqwest::Client,
}

impl FacebookVerifier {
    pub fn new(app: FacebookApp) -> Result<Self> {
        Ok(Self {
            app,
            me_url: FACEBOOK_ME_URL.to_string(),
            debug_token_url: FACEBOOK_DEBUG_TOKEN_URL.to_string(),
            http: http_client()?,
        })
    }

    async fn token_owner(&self, access_token: &str) -> Result<String, VerificationError> {
        let app_token = format!("{}|{}", self.app.app_id, self.app.app_secret.expose_secret());
        let response = self
            .http
            .get(&self.debug_token_url)
            .query(&[
                ("input_token", access_token),
                ("access_token", app_token.as_str()),
            ])
            .send()
            .await
            .map_err(|err| unavailable(err.into()))?;
        if !response.status().is_success() {
            return Err(VerificationError(format!(
                "facebook debug_token failed with status {}",
                response.status()
            )));
        }
        let inspected: DebugTokenResponse = response
            .json()
            .await
            .map_err(|err| VerificationError(format!("unexpected debug_token reply: {err}")))?;
        inspected.data.owner_for_app(&self.app.app_id)
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<OAuthClaims, VerificationError> {
        let owner = self.token_owner(access_token).await?;
        let response = self
            .http
            .get(&self.me_url)
            .query(&[
                ("fields", "id,first_name,last_name"),
                ("access_token", access_token),
            ])
            .send()
            .await
            .map_err(|err| unavailable(err.into()))?;
        if !response.status().is_success() {
            return Err(VerificationError(format!(
                "facebook rejected access token with status {}",
                response.status()
            )));
        }
        let profile: FacebookProfile = response
            .json()
            .await
            .map_err(|err| VerificationError(format!("unexpected facebook profile: {err}")))?;
        if profile.id != owner {
            return Err(VerificationError(
                "facebook profile does not match the token owner".to_string(),
            ));
        }
        Ok(profile.into())
    }
}

impl IdentityVerifier for FacebookVerifier {
    fn verify<'a>(&'a self, assertion: &'a str) -> VerifyFuture<'a> {
        Box::pin(self.fetch_profile(assertion))
    }
}

fn unavailable(err: anyhow::Error) -> VerificationError {
    warn!("identity provider unavailable: {err:#}");
    VerificationError(format!("identity provider unavailable: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64ct::{Base64UrlUnpadded, Encoding};

    #[test]
    fn only_configured_providers_get_verifiers() -> Result<()> {
        assert!(ProviderConfig::default().verifiers()?.is_empty());

        let config = ProviderConfig {
            google_client_id: Some("google-client".to_string()),
            apple_client_id: None,
            facebook: Some(FacebookApp {
                app_id: "1234".to_string(),
                app_secret: SecretString::from("app-secret".to_string()),
            }),
        };
        let providers: Vec<OAuthProvider> = config
            .verifiers()?
            .into_iter()
            .map(|(provider, _)| provider)
            .collect();
        assert_eq!(providers, vec![OAuthProvider::Google, OAuthProvider::Facebook]);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_id_token_fails_before_any_fetch() -> Result<()> {
        let verifier = JwksVerifier::google("client-id".to_string())?;
        assert!(verifier.verify("not-a-jwt").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn unknown_key_id_does_not_refetch_a_fresh_cache() -> Result<()> {
        let verifier = JwksVerifier {
            client_id: "client-id".to_string(),
            issuers: vec!["https://accounts.google.com".to_string()],
            // Nothing listens here; any fetch would fail as "unavailable".
            jwks_url: "http://127.0.0.1:9/certs".to_string(),
            http: http_client()?,
            cache: RwLock::new(Some((JwkSet { keys: Vec::new() }, Instant::now()))),
        };
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"RS256","kid":"forged"}"#);
        let token = format!("{header}.e30.c2ln");

        for _ in 0..3 {
            let err = verifier.verify(&token).await.err().map(|err| err.0);
            assert_eq!(err.as_deref(), Some("unknown signing key forged"));
        }
        Ok(())
    }

    #[test]
    fn facebook_profile_maps_to_claims_without_email() -> Result<()> {
        let profile: FacebookProfile = serde_json::from_str(
            r#"{"id":"42","first_name":"Grace","last_name":"Hopper","email":"grace@example.com"}"#,
        )?;
        let claims = OAuthClaims::from(profile);
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.email, None);
        assert_eq!(claims.given_name.as_deref(), Some("Grace"));
        Ok(())
    }

    #[test]
    fn debug_token_must_belong_to_this_app() -> Result<()> {
        let reply: DebugTokenResponse = serde_json::from_str(
            r#"{"data":{"app_id":"1234","is_valid":true,"user_id":"555","type":"USER"}}"#,
        )?;
        assert_eq!(reply.data.owner_for_app("1234").ok().as_deref(), Some("555"));

        let reply: DebugTokenResponse = serde_json::from_str(
            r#"{"data":{"app_id":"9999","is_valid":true,"user_id":"555"}}"#,
        )?;
        assert!(reply.data.owner_for_app("1234").is_err());

        let expired = DebugTokenData {
            app_id: Some("1234".to_string()),
            is_valid: Some(false),
            user_id: Some("555".to_string()),
        };
        assert!(expired.owner_for_app("1234").is_err());
        assert!(DebugTokenData::default().owner_for_app("1234").is_err());
        Ok(())
    }

    #[test]
    fn email_verified_accepts_bool_and_text() -> Result<()> {
        let claims: IdTokenClaims =
            serde_json::from_str(r#"{"sub":"1","email_verified":"false"}"#)?;
        assert!(claims.email_verified.is_some_and(|verified| !verified.is_true()));
        let claims: IdTokenClaims = serde_json::from_str(r#"{"sub":"1","email_verified":true}"#)?;
        assert!(claims.email_verified.is_some_and(|verified| verified.is_true()));
        Ok(())
    }
}
