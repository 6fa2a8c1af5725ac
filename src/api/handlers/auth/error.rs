//! Error taxonomy for the auth subsystem and its HTTP mapping.
//!
//! Every failure path inside the gateway resolves to an [`AuthError`] before it
//! reaches the response layer. Authentication failures of any kind share one
//! response body; the detailed reason only goes to the audit log.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, warn};

use crate::model::AccountStatus;

pub(crate) const GENERIC_AUTH_FAILURE: &str = "Incorrect username or password. Please try again.";
pub(crate) const RESET_TOKEN_INVALID: &str = "Password reset link is invalid or has expired.";

/// Why a credential or session check failed. Internal only: callers always see
/// the same generic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    NotFound,
    WrongPassword,
    NoPasswordCredential,
    AccountNotActive(AccountStatus),
    MissingCredentials,
    SessionExpired,
    UnknownSession,
    UnknownAccount,
    SignedOut,
    TokenExpired,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("account not found"),
            Self::WrongPassword => f.write_str("wrong password"),
            Self::NoPasswordCredential => f.write_str("account has no password credential"),
            Self::AccountNotActive(status) => write!(f, "account status is {status}"),
            Self::MissingCredentials => f.write_str("no session artifact presented"),
            Self::SessionExpired => f.write_str("session idle beyond timeout"),
            Self::UnknownSession => f.write_str("session not found"),
            Self::UnknownAccount => f.write_str("session account no longer exists"),
            Self::SignedOut => f.write_str("account signed out of bearer sessions"),
            Self::TokenExpired => f.write_str("bearer token expired"),
        }
    }
}

/// Field-level validation errors, rendered as `{"errors": {"field": [..]}}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    #[must_use]
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), AuthError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.fields {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{field} {message}")?;
                first = false;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed or forged token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token expired")]
    Expired,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error("authentication failed: {0}")]
    Unauthenticated(AuthFailure),
    #[error("bearer token rejected: {0}")]
    TokenDecode(#[from] TokenError),
    #[error("identity provider rejected assertion: {0}")]
    ExternalVerification(String),
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("reset token invalid or expired")]
    ResetTokenInvalid,
    #[error("password confirmation does not match")]
    PasswordMismatch,
    #[error("insufficient role")]
    Forbidden,
    #[error("resource not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PasswordMismatch => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated(_) | Self::TokenDecode(_) | Self::ExternalVerification(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ResetTokenInvalid => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Validation(errors) => (status, Json(json!({ "errors": errors }))).into_response(),
            Self::PasswordMismatch => {
                let errors = ValidationErrors::single(
                    "password_confirmation",
                    "Password and confirmation do not match.",
                );
                (status, Json(json!({ "errors": errors }))).into_response()
            }
            Self::Unauthenticated(_) | Self::TokenDecode(_) | Self::ExternalVerification(_) => {
                warn!(reason = %self, "authentication rejected");
                (status, Json(json!({ "error": GENERIC_AUTH_FAILURE }))).into_response()
            }
            Self::RateLimited {
                retry_after_seconds,
            } => {
                let mut response = (
                    status,
                    Json(json!({ "error": "Too many requests. Please retry later." })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_seconds.to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
                response
            }
            Self::ResetTokenInvalid => {
                (status, Json(json!({ "error": RESET_TOKEN_INVALID }))).into_response()
            }
            Self::Forbidden => (status, Json(json!({ "error": "Forbidden" }))).into_response(),
            Self::NotFound => (status, Json(json!({ "error": "Not found" }))).into_response(),
            Self::Internal(err) => {
                error!("auth internal error: {err:#}");
                (status, Json(json!({ "error": "Internal server error" }))).into_response()
            }
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
