//! Auth handlers and supporting modules.
//!
//! This module covers credential verification, cookie sessions, bearer
//! tokens, password reset, third-party sign-in and throttling for every
//! tenant served by `warden`.
//!
//! ## Sessions
//!
//! - **Cookie:** `warden_session` carries a random id whose SHA-256 digest is
//!   the stored key. Idle sessions expire after 30 minutes; any authenticated
//!   request slides the window.
//! - **Bearer:** HS256 tokens valid for 5 days. Sign-out flips the account's
//!   `signed_in` flag and thereby revokes every outstanding token.
//!
//! ## Rate Limiting
//!
//! Fixed windows keyed by rule, discriminator (IP or normalized email) and
//! window index:
//!
//! - **Login:** 5 per 20 seconds per IP, and per email.
//! - **Password reset:** 3 per hour per IP, and per email.
//! - **Signup:** 5 per hour per IP.
//! - **Generic API:** 300 per 5 minutes per IP on `/v1/*`.
//!
//! Throttled requests get `429` with `Retry-After`.
//!
//! > **Warning:** Rotating the token secret invalidates every bearer token.

pub(crate) mod bearer;
pub(crate) mod clock;
pub(crate) mod credentials;
pub(crate) mod error;
mod gateway;
pub(crate) mod oauth;
mod oauth_providers;
mod password;
pub(crate) mod password_reset;
pub(crate) mod principal;
pub(crate) mod rate_limit;
pub(crate) mod session;
mod state;
pub(crate) mod token;
pub(crate) mod types;
mod utils;
pub(crate) mod web;

pub use clock::{Clock, SystemClock};
pub use error::{AuthError, AuthResult};
pub use gateway::{AuthGateway, Authenticated, RequestContext};
pub use oauth::{IdentityVerifier, OAuthProvider};
pub use oauth_providers::{FacebookApp, FacebookVerifier, JwksVerifier, ProviderConfig};
pub use password_reset::ResetNotifier;
pub use principal::Identity;
pub use rate_limit::{NoopRateLimiter, RateLimitAction, RateLimiter, WindowRateLimiter};
pub use state::{AuthCollaborators, AuthConfig, AuthState, AuthStores, SignupHook};
pub use token::TokenCodec;

#[cfg(test)]
pub(crate) mod test_support;
