//! # Warden (Multi-Tenant Authentication)
//!
//! `warden` authenticates accounts for every tenant it serves. Browsers get a
//! server-side cookie session; API clients get HS256 bearer tokens.
//!
//! ## Tenant Model
//!
//! A tenant is identified by a random 12-character URL key. An account belongs
//! to at most one tenant and carries one role (`member`, `admin`,
//! `super_admin`). Tenants and accounts are soft-deleted first; `warden purge`
//! hard-deletes rows past the retention window.
//!
//! ## Authentication
//!
//! - **Passwords:** Argon2id hashes; unknown emails and wrong passwords fail
//!   with one indistinguishable response.
//! - **Third-party sign-in:** Google and Apple ID tokens are checked against
//!   the provider JWKS; Facebook access tokens against the Graph API.
//! - **Password reset:** single-use tokens, stored as SHA-256 digests, valid
//!   for two hours.
//!
//! ## Throttling
//!
//! Fixed-window counters keyed by IP and email guard sign-in, signup, reset
//! and the `/v1/*` API. Use the postgres counter store when more than one
//! instance serves traffic.

pub mod api;
pub mod cli;
pub mod model;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
