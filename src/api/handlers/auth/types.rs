//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::credentials::SignupInput;
use super::principal::Identity;
use crate::model::Account;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct SignupRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

impl From<SignupRequest> for SignupInput {
    fn from(request: SignupRequest) -> Self {
        Self {
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            password: request.password,
            password_confirmation: request.password_confirmation,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// Cookie flow: the token travels in the path.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub password: String,
    pub password_confirmation: String,
}

/// Bearer flow: the token travels in the body.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct BearerResetPasswordRequest {
    pub reset_token: String,
    pub password: String,
    pub password_confirmation: String,
}

/// A provider assertion: Google/Apple ID token or Facebook access token.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OAuthCallbackRequest {
    #[serde(alias = "token", alias = "id_token", alias = "access_token")]
    pub credential: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GsiResponse {
    pub apikey: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GsiSessionQuery {
    pub user_apikey: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccountResponse {
    pub id: String,
    pub tenant_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.to_string(),
            tenant_id: account.tenant_id.map(|id| id.to_string()),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            name: account.name(),
            email: account.email.clone(),
            role: account.role.to_string(),
            status: account.status.to_string(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub token: String,
    pub account: AccountResponse,
}

#[derive(ToSchema, Serialize, Debug)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub identity: Identity,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetTokenStatus {
    pub valid: bool,
    pub email: String,
}
