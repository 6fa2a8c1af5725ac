//! Request-facing facade: throttle first, then resolve who is calling.
//!
//! Handlers extract a [`RequestContext`] once per request and pass it
//! explicitly; nothing about the caller lives in ambient state.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{Extensions, HeaderMap, request::Parts},
};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use super::{
    AuthState,
    error::{AuthError, AuthFailure, AuthResult},
    principal::Identity,
    rate_limit::{RateLimitAction, RateLimitDecision, RateLimiter},
    session::{SessionManager, extract_bearer_token, extract_session_cookie},
    utils::client_ip,
};
use crate::model::Account;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub session_token: Option<String>,
    pub bearer_token: Option<String>,
}

impl RequestContext {
    /// The client IP comes from the socket peer (`ConnectInfo`), or from
    /// proxy headers when the deployment trusts them.
    #[must_use]
    pub fn from_request(headers: &HeaderMap, extensions: &Extensions) -> Self {
        let peer = extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let trust_proxy_headers = extensions
            .get::<Arc<AuthState>>()
            .is_some_and(|state| state.config().trust_proxy_headers());
        Self {
            client_ip: client_ip(headers, peer, trust_proxy_headers),
            session_token: extract_session_cookie(headers),
            bearer_token: extract_bearer_token(headers),
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_request(&parts.headers, &parts.extensions))
    }
}

/// The caller behind a request, plus the account it was resolved from.
#[derive(Clone, Debug)]
pub struct Authenticated {
    pub account: Account,
    pub identity: Identity,
}

impl From<Account> for Authenticated {
    fn from(account: Account) -> Self {
        let identity = Identity::from(&account);
        Self { account, identity }
    }
}

pub struct AuthGateway {
    rate_limiter: Arc<dyn RateLimiter>,
    sessions: Arc<SessionManager>,
}

impl AuthGateway {
    pub fn new(rate_limiter: Arc<dyn RateLimiter>, sessions: Arc<SessionManager>) -> Self {
        Self {
            rate_limiter,
            sessions,
        }
    }

    /// Apply the IP rule, then the email rule, of `action`.
    pub async fn throttle(
        &self,
        context: &RequestContext,
        action: RateLimitAction,
        email: Option<&str>,
    ) -> AuthResult<()> {
        let by_ip = self
            .rate_limiter
            .check_ip(context.client_ip.as_deref(), action)
            .await?;
        limited(by_ip)?;
        let by_email = self.rate_limiter.check_email(email, action).await?;
        limited(by_email)
    }

    /// Bearer token first, then the session cookie.
    pub async fn resolve_identity(&self, context: &RequestContext) -> AuthResult<Authenticated> {
        if let Some(token) = context.bearer_token.as_deref() {
            return Ok(self.sessions.authenticate_bearer(token).await?.into());
        }
        if context.session_token.is_some() {
            return Ok(self
                .sessions
                .authenticate_request(context.session_token.as_deref())
                .await?
                .into());
        }
        Err(AuthError::Unauthenticated(AuthFailure::MissingCredentials))
    }

    pub async fn resolve_bearer(&self, context: &RequestContext) -> AuthResult<Authenticated> {
        let Some(token) = context.bearer_token.as_deref() else {
            return Err(AuthError::Unauthenticated(AuthFailure::MissingCredentials));
        };
        Ok(self.sessions.authenticate_bearer(token).await?.into())
    }
}

fn limited(decision: RateLimitDecision) -> AuthResult<()> {
    match decision {
        RateLimitDecision::Allowed => Ok(()),
        RateLimitDecision::Limited {
            retry_after_seconds,
        } => Err(AuthError::RateLimited {
            retry_after_seconds,
        }),
    }
}
