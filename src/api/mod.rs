// Axum web server layer.

use axum::{error_handling::HandleErrorLayer, extract::Request, http::StatusCode, BoxError, Router};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

pub mod handlers;
pub mod middleware;
pub mod responses;

use crate::engine::Engine;

/// Application state shared across every handler: just the engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Builds the router with all PolicyShield routes and the middleware stack
/// (outermost to innermost): tracing, body size limit, request timeout,
/// bearer-token auth (skipping the public health check).
///
/// `auth_state` is `None` when no `POLICYSHIELD_API_TOKEN` is configured, in
/// which case no auth layer is applied at all (spec §6: absence of the token
/// means the server is open).
pub fn create_router(
    app_state: AppState,
    auth_state: Option<Arc<crate::auth::auth_middleware::AuthState>>,
) -> Router {
    use axum::{
        extract::State,
        middleware::Next,
        routing::{get, post},
    };

    let body_limit = app_state.engine.config.body_size_limit_bytes;
    let timeout_secs = app_state.engine.config.request_timeout_secs;

    let mut router = Router::new()
        .route("/api/v1/check", post(handlers::check_handler))
        .route("/api/v1/post-check", post(handlers::post_check_handler))
        .route("/api/v1/constraints", get(handlers::constraints_handler))
        .route("/api/v1/reload", post(handlers::reload_handler))
        .route("/api/v1/respond-approval", post(handlers::respond_approval_handler))
        .route("/api/v1/check-approval", post(handlers::check_approval_handler))
        .route("/api/v1/pending-approvals", get(handlers::pending_approvals_handler))
        .route("/api/v1/clear-taint", post(handlers::clear_taint_handler))
        .route("/admin/kill", post(handlers::kill_handler))
        .route("/admin/resume", post(handlers::resume_handler))
        .route("/api/v1/health", get(handlers::health_handler))
        .route("/api/v1/status", get(handlers::status_handler))
        .with_state(app_state);

    if let Some(auth_state) = auth_state {
        router = router.route_layer(axum::middleware::from_fn_with_state(
            auth_state,
            |state: State<Arc<crate::auth::auth_middleware::AuthState>>, request: Request, next: Next| async move {
                if request.uri().path() == "/api/v1/health" {
                    return Ok(next.run(request).await);
                }
                crate::auth::auth_middleware::auth_middleware(state, request, next).await
            },
        ));
    }

    router = router.layer(RequestBodyLimitLayer::new(body_limit));

    let middleware_stack = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(|e: BoxError| async move {
            let status = if e.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, e.to_string())
        }))
        .timeout(Duration::from_secs(timeout_secs))
        .layer(middleware::tracing_layer())
        .into_inner();

    router.layer(middleware_stack)
}
