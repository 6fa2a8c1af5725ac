//! Cookie-session endpoints used by the browser frontend.
//!
//! Flow Overview:
//! 1) `/signin` and `/signup` start a server-side session and set the
//!    `warden_session` cookie.
//! 2) `/gsi` exchanges a Google ID token for the account's API key, which the
//!    frontend trades for a session at `/gsi/session`.
//! 3) `/forgot` and `/reset-password/{token}` drive the reset flow; `/forgot`
//!    answers the same way whether or not the email exists.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    AuthState, RequestContext,
    error::{AuthError, AuthFailure},
    oauth::OAuthProvider,
    rate_limit::RateLimitAction,
    session::{IssuedSession, clear_session_cookie, session_cookie},
    types::{
        AccountResponse, ForgotPasswordRequest, GsiResponse, GsiSessionQuery, MessageResponse,
        OAuthCallbackRequest, ResetPasswordRequest, ResetTokenStatus, SigninRequest,
        SignupRequest,
    },
};
use crate::model::Account;

pub(super) const FORGOT_MESSAGE: &str =
    "If that email address is in our system, we have sent you password reset instructions.";
pub(super) const RESET_DONE_MESSAGE: &str = "Your password has been changed. You may login now.";
pub(super) const SIGNED_OUT_MESSAGE: &str = "Signed out.";

/// Run the optional post-signup hook. The signup stands even if it fails.
pub(super) async fn run_signup_hook(auth_state: &AuthState, account: &Account) {
    if let Some(hook) = auth_state.signup_hook()
        && let Err(err) = hook.after_signup(account).await
    {
        warn!(account_id = %account.id, "signup hook failed: {err:#}");
    }
}

fn with_session_cookie(
    auth_state: &AuthState,
    session: &IssuedSession,
) -> Result<HeaderMap, AuthError> {
    let cookie = session_cookie(auth_state.config(), &session.token)
        .map_err(|err| anyhow::anyhow!("failed to build session cookie: {err}"))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok(headers)
}

#[utoipa::path(
    post,
    path = "/signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set.", body = AccountResponse),
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
    let session = auth_state
        .sessions()
        .sign_in(&request.email, &request.password)
        .await?;
    let response_headers = with_session_cookie(&auth_state, &session)?;
    Ok((
        StatusCode::OK,
        response_headers,
        Json(AccountResponse::from(&session.account)),
    ))
}

#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created; session cookie set.", body = AccountResponse),
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
    let session = auth_state.sessions().start_session(account).await?;
    run_signup_hook(&auth_state, &session.account).await;
    let response_headers = with_session_cookie(&auth_state, &session)?;
    Ok((
        StatusCode::CREATED,
        response_headers,
        Json(AccountResponse::from(&session.account)),
    ))
}

async fn end_session(context: &RequestContext, auth_state: &AuthState) -> Result<Response, AuthError> {
    auth_state
        .sessions()
        .sign_out(context.session_token.as_deref())
        .await?;

    // Always clear the cookie, even if the session was already gone.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        StatusCode::OK,
        response_headers,
        Json(MessageResponse::new(SIGNED_OUT_MESSAGE)),
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/signout",
    responses((status = 200, description = "Session cleared.", body = MessageResponse)),
    tag = "auth"
)]
pub async fn signout_get(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    end_session(&context, &auth_state).await
}

#[utoipa::path(
    post,
    path = "/signout",
    responses((status = 200, description = "Session cleared.", body = MessageResponse)),
    tag = "auth"
)]
pub async fn signout_post(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    end_session(&context, &auth_state).await
}

#[utoipa::path(
    post,
    path = "/gsi",
    request_body = OAuthCallbackRequest,
    responses(
        (status = 200, description = "Google identity verified.", body = GsiResponse),
        (status = 401, description = "Verification failed."),
    ),
    tag = "auth"
)]
pub async fn gsi(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<OAuthCallbackRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .gateway()
        .throttle(&context, RateLimitAction::Login, None)
        .await?;
    let account = auth_state
        .oauth()
        .sign_in(OAuthProvider::Google, &request.credential)
        .await?;
    Ok(Json(GsiResponse {
        apikey: account.api_key,
    }))
}

#[utoipa::path(
    get,
    path = "/gsi/session",
    params(("user_apikey" = String, Query, description = "API key returned by /gsi")),
    responses(
        (status = 200, description = "Session cookie set.", body = AccountResponse),
        (status = 401, description = "Unknown or inactive account."),
    ),
    tag = "auth"
)]
pub async fn gsi_session(
    context: RequestContext,
    Query(query): Query<GsiSessionQuery>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .gateway()
        .throttle(&context, RateLimitAction::Login, None)
        .await?;
    let account = auth_state
        .credentials()
        .accounts()
        .find_by_api_key(&query.user_apikey)
        .await?
        .filter(Account::is_active)
        .ok_or(AuthError::Unauthenticated(AuthFailure::UnknownAccount))?;
    let session = auth_state.sessions().start_session(account).await?;
    info!(account_id = %session.account.id, "google session started");
    let response_headers = with_session_cookie(&auth_state, &session)?;
    Ok((
        StatusCode::OK,
        response_headers,
        Json(AccountResponse::from(&session.account)),
    ))
}

#[utoipa::path(
    post,
    path = "/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Accepted; identical for unknown emails.", body = MessageResponse),
        (status = 429, description = "Too many reset requests."),
    ),
    tag = "auth"
)]
pub async fn forgot(
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
    get,
    path = "/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the email")),
    responses(
        (status = 200, description = "Token is valid.", body = ResetTokenStatus),
        (status = 400, description = "Invalid or expired token."),
    ),
    tag = "auth"
)]
pub async fn show_reset(
    Path(token): Path<String>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let account = auth_state.resets().validate(&token).await?;
    Ok(Json(ResetTokenStatus {
        valid: true,
        email: account.email,
    }))
}

#[utoipa::path(
    post,
    path = "/reset-password/{token}",
    params(("token" = String, Path, description = "Reset token from the email")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed.", body = MessageResponse),
        (status = 400, description = "Invalid or expired token."),
        (status = 422, description = "Weak password or confirmation mismatch."),
    ),
    tag = "auth"
)]
pub async fn reset_password(
    Path(token): Path<String>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    auth_state
        .resets()
        .consume(&token, &request.password, &request.password_confirmation)
        .await?;
    Ok(Json(MessageResponse::new(RESET_DONE_MESSAGE)))
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Current account.", body = AccountResponse),
        (status = 401, description = "Not signed in."),
    ),
    tag = "auth"
)]
pub async fn me(
    context: RequestContext,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<impl IntoResponse, AuthError> {
    let caller = auth_state.gateway().resolve_identity(&context).await?;
    Ok(Json(AccountResponse::from(&caller.account)))
}
