//! Bearer-token endpoints under `/v1` for API and mobile clients.
//!
//! Tokens are stateless HS256 JWTs; revocation rides on the account's
//! `signed_in` flag, so `/v1/signout` invalidates every token of the account.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

use super::{
    AuthState, RequestContext,
    error::AuthError,
    oauth::OAuthProvider,
    rate_limit::RateLimitAction,
    types::{
        AccountResponse, BearerResetPasswordRequest, ForgotPasswordRequest, MessageResponse,
        OAuthCallbackRequest, SigninRequest, SignupRequest, TokenResponse, ValidateTokenResponse,
    },
    web::{FORGOT_MESSAGE, RESET_DONE_MESSAGE, SIGNED_OUT_MESSAGE, run_signup_hook},
};
use crate::model::Account;

fn token_response(account: &Account, token: String) -> Json<TokenResponse> {
    Json(TokenResponse {
        token,
        account: AccountResponse::from(account),
    })
}

#[utoipa::path(
    post,
    path = "/v1/signin",
    operation_id = "bearer_signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Bearer token issued.", body = TokenResponse),
        (status = 401, description = "Incorrect username or password."),
        (status = 429, description = "Too many attempts."),
    ),
    tag = "auth"
)]
pub async fn signin(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SigninRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .gateway()
        .throttle(&context, RateLimitAction::Login, Some(&request.email))
        .await?;
    let (account, token) = auth_state
        .sessions()
        .bearer_sign_in(&request.email, &request.password)
        .await?;
    Ok(token_response(&account, token))
}

#[utoipa::path(
    post,
    path = "/v1/signup",
    operation_id = "bearer_signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created; bearer token issued.", body = TokenResponse),
        (status = 422, description = "Field errors."),
        (status = 429, description = "Too many signups from this address."),
    ),
    tag = "auth"
)]
pub async fn signup(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .gateway()
        .throttle(&context, RateLimitAction::Signup, None)
        .await?;
    let account = auth_state.credentials().register(request.into()).await?;
    let (account, token) = auth_state.sessions().issue_bearer(account).await?;
    run_signup_hook(&auth_state, &account).await;
    Ok((StatusCode::CREATED, token_response(&account, token)))
}

#[utoipa::path(
    post,
    path = "/v1/signout",
    operation_id = "bearer_signout",
    responses(
        (status = 200, description = "Every token of the account revoked.", body = MessageResponse),
        (status = 401, description = "Missing or invalid bearer token."),
    ),
    tag = "auth"
)]
pub async fn signout(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_bearer(&context).await?;
    let account_id = caller.account.id;
    auth_state.sessions().sign_out_bearer(caller.account).await?;
    info!(account_id = %account_id, "bearer sign-out");
    Ok(Json(MessageResponse::new(SIGNED_OUT_MESSAGE)))
}

#[utoipa::path(
    post,
    path = "/v1/forgot_password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted; identical for unknown emails.", body = MessageResponse),
        (status = 429, description = "Too many reset requests."),
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .gateway()
        .throttle(&context, RateLimitAction::PasswordReset, Some(&request.email))
        .await?;
    auth_state.resets().request(&request.email).await?;
    Ok(Json(MessageResponse::new(FORGOT_MESSAGE)))
}

#[utoipa::path(
    post,
    path = "/v1/reset_password",
    operation_id = "bearer_reset_password",
    request_body = BearerResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed.", body = MessageResponse),
        (status = 400, description = "Invalid or expired token."),
        (status = 422, description = "Weak password or confirmation mismatch."),
    ),
    tag = "auth"
)]
pub async fn reset_password(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<BearerResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .resets()
        .consume(
            &request.reset_token,
            &request.password,
            &request.password_confirmation,
        )
        .await?;
    Ok(Json(MessageResponse::new(RESET_DONE_MESSAGE)))
}

#[utoipa::path(
    post,
    path = "/v1/validate_token",
    responses(
        (status = 200, description = "Token is valid.", body = ValidateTokenResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token."),
    ),
    tag = "auth"
)]
pub async fn validate_token(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_bearer(&context).await?;
    Ok(Json(ValidateTokenResponse {
        valid: true,
        identity: caller.identity,
    }))
}

async fn oauth_exchange(
    context: &RequestContext,
    auth_state: &AuthState,
    provider: OAuthProvider,
    assertion: &str,
) -> Result<Json<TokenResponse>, AuthError> {
    auth_state
        .gateway()
        .throttle(context, RateLimitAction::Login, None)
        .await?;
    let account = auth_state.oauth().sign_in(provider, assertion).await?;
    let (account, token) = auth_state.sessions().issue_bearer(account).await?;
    info!(account_id = %account.id, provider = %provider, "bearer token issued via provider");
    Ok(token_response(&account, token))
}

#[utoipa::path(
    post,
    path = "/v1/auth/gsi/callback",
    request_body = OAuthCallbackRequest,
    responses(
        (status = 200, description = "Bearer token issued.", body = TokenResponse),
        (status = 401, description = "Verification failed."),
    ),
    tag = "auth"
)]
pub async fn google_callback(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<OAuthCallbackRequest>,
) -> Result<impl IntoResponse, AuthError> {
    oauth_exchange(&context, &auth_state, OAuthProvider::Google, &request.credential).await
}

#[utoipa::path(
    post,
    path = "/v1/auth/apple",
    request_body = OAuthCallbackRequest,
    responses(
        (status = 200, description = "Bearer token issued.", body = TokenResponse),
        (status = 401, description = "Verification failed."),
    ),
    tag = "auth"
)]
pub async fn apple(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<OAuthCallbackRequest>,
) -> Result<impl IntoResponse, AuthError> {
    oauth_exchange(&context, &auth_state, OAuthProvider::Apple, &request.credential).await
}

#[utoipa::path(
    post,
    path = "/v1/auth/facebook",
    request_body = OAuthCallbackRequest,
    responses(
        (status = 200, description = "Bearer token issued.", body = TokenResponse),
        (status = 401, description = "Verification failed."),
    ),
    tag = "auth"
)]
pub async fn facebook(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<OAuthCallbackRequest>,
) -> Result<impl IntoResponse, AuthError> {
    oauth_exchange(&context, &auth_state, OAuthProvider::Facebook, &request.credential).await
}

#[utoipa::path(
    get,
    path = "/v1/me",
    operation_id = "bearer_me",
    responses(
        (status = 200, description = "Account behind the bearer token.", body = AccountResponse),
        (status = 401, description = "Missing, invalid, expired or revoked token."),
    ),
    tag = "auth"
)]
pub async fn me(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_bearer(&context).await?;
    Ok(Json(AccountResponse::from(&caller.account)))
}
