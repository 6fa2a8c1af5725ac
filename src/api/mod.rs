use crate::{
    api::handlers::{
        auth::{
            self, AuthCollaborators, AuthState, AuthStores, ProviderConfig, RateLimitAction,
            RequestContext, SystemClock, TokenCodec, WindowRateLimiter,
        },
        health::{self, HealthProbe},
    },
    store::{self, StorageConfig},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    extract::{MatchedPath, Request},
    http::{
        HeaderName, HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::options,
};
use secrecy::SecretString;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod email;
pub mod handlers;

/// How often idle sessions and closed rate-limit windows are dropped.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the full application: documented routes, preflight-only
/// `OPTIONS /health`, request ids, tracing, CORS and the `/v1/*` throttle.
///
/// # Errors
/// Returns an error if the frontend base URL has no usable origin.
pub fn app(auth_state: Arc<AuthState>, probe: HealthProbe) -> Result<Router> {
    let frontend_origin = frontend_origin(auth_state.config().frontend_base_url())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let (router, _openapi) = router().split_for_parts();
    Ok(router.route("/health", options(health::health)).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(auth_state))
            .layer(Extension(probe))
            .layer(middleware::from_fn(throttle_api)),
    ))
}

/// Generic per-IP throttle for the bearer API.
async fn throttle_api(
    Extension(auth_state): Extension<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with("/v1/") {
        return next.run(request).await;
    }
    let context = RequestContext::from_request(request.headers(), request.extensions());
    match auth_state
        .gateway()
        .throttle(&context, RateLimitAction::Api, None)
        .await
    {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    storage: StorageConfig,
    auth_config: auth::AuthConfig,
    token_secret: &SecretString,
    providers: &ProviderConfig,
    email_config: email::EmailWorkerConfig,
) -> Result<()> {
    let stores = storage.open().await?;
    let codec = TokenCodec::new(token_secret, auth_config.bearer_token_ttl_seconds())
        .context("Failed to build token codec")?;

    // The outbox worker delivers reset emails off the request path.
    let outbox = email::EmailOutbox::spawn(Arc::new(email::LogEmailSender), email_config);

    let sweeper = store::spawn_sweeper(
        stores.sessions.clone(),
        stores.counters.clone(),
        chrono::Duration::seconds(auth_config.session_timeout_seconds()),
        SWEEP_INTERVAL,
    );

    let clock = Arc::new(SystemClock);
    let mut collaborators = AuthCollaborators::new(Arc::new(outbox))
        .with_clock(clock.clone())
        .with_rate_limiter(Arc::new(WindowRateLimiter::new(stores.counters, clock)));
    for (provider, verifier) in providers.verifiers()? {
        collaborators = collaborators.with_verifier(provider, verifier);
    }

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        AuthStores {
            accounts: stores.accounts,
            sessions: stores.sessions,
            tenants: stores.tenants,
        },
        codec,
        collaborators,
    ));

    let app = app(auth_state, HealthProbe { pool: stores.pool })?;

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.abort();
    Ok(())
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
