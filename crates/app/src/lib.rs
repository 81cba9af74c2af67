//! Restbase application composition root
//!
//! Wires the token store, the authentication pipeline and the error boundary
//! into a single router.

pub mod errors;
pub mod handlers;

use std::sync::Arc;

use axum::{
    extract::FromRef,
    middleware,
    routing::{delete, get, post},
    Router,
};
use restbase_auth::{
    run_pipeline, AuthBackend, AuthConfig, Pipeline, QueryBinding, RateLimit, TokenStore,
};
use restbase_common::{error_boundary, panic_response, Config, ErrorBoundary, Reporter};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub auth: AuthBackend,
}

impl FromRef<AppState> for AuthBackend {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

/// Build the authentication pipeline: authenticate, then query binding, then rate limiting
pub fn build_pipeline(config: &Config, auth: AuthBackend) -> Pipeline {
    let pipeline = Pipeline::from_config(config)
        .step(auth)
        .step(QueryBinding::new());

    match &config.rate_limit {
        Some(limit) => pipeline.step(RateLimit::from_config(limit)),
        None => pipeline,
    }
}

/// Create the main application router with all routes and middleware
pub fn create_app(
    config: &Config,
    store: Arc<dyn TokenStore>,
    reporter: Reporter,
) -> Result<Router, anyhow::Error> {
    let auth = AuthBackend::new(store, AuthConfig::from_config(config));
    let pipeline = build_pipeline(config, auth.clone());
    let boundary = ErrorBoundary::new(config.debug, reporter, errors::registry()?);

    tracing::info!(steps = ?pipeline.step_names(), debug = config.debug, "Request pipeline configured");

    let protected = Router::new()
        .route("/v1/tokens", post(handlers::issue_token))
        .route("/v1/tokens/current", delete(handlers::revoke_current))
        .route("/v1/whoami", get(handlers::whoami))
        .route_layer(middleware::from_fn_with_state(pipeline, run_pipeline));

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(AppState { auth })
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(boundary, error_boundary))
                .layer(CatchPanicLayer::custom(panic_response)),
        );

    Ok(app)
}
