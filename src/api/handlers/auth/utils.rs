//! Small helpers shared by the auth components.

use anyhow::{Context, Result};
use axum::http::HeaderMap;
use base64ct::{Base64UrlUnpadded, Encoding};
use once_cell::sync::Lazy;
use rand::{RngCore, rngs::OsRng};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

static EMAIL_FORMAT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)^[^@\s]+@(?:[-a-z0-9]+\.)+[a-z]{2,}$").ok());

/// Normalize an email for lookup/uniqueness checks.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_FORMAT
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// 32 random bytes, URL-safe base64 without padding.
///
/// Used for session ids, reset tokens, API keys and throwaway OAuth passwords.
pub(crate) fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate random token")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// SHA-256 of a token so raw values never touch the store.
pub(crate) fn digest_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Build the frontend link included in the reset email.
pub(crate) fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password/{token}")
}

/// Client IP used as the rate-limit discriminator.
///
/// The socket peer is authoritative. Proxy headers are honored only when
/// `trust_proxy_headers` is set: `x-real-ip` first, then the last hop of
/// `x-forwarded-for` (the one appended by our proxy, not the client).
pub(crate) fn client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> Option<String> {
    if trust_proxy_headers && let Some(ip) = proxied_client_ip(headers) {
        return Some(ip);
    }
    peer.map(|addr| addr.ip().to_string())
}

fn proxied_client_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    header("x-real-ip")
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            header("x-forwarded-for").and_then(|value| {
                value
                    .rsplit(',')
                    .map(str::trim)
                    .find(|hop| !hop.is_empty())
                    .map(str::to_string)
            })
        })
}
