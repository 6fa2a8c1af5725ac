//! API handlers for `warden`.
//!
//! `auth` holds the authentication subsystem and its cookie and bearer
//! routes; `tenants` covers onboarding and super-admin lifecycle; `health`
//! reports build info and database reachability.

pub mod auth;
pub mod health;
pub mod tenants;
