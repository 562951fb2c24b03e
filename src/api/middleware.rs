// Middleware stack for observability and request protection.
//
// Kept for documentation purposes; the actual layers are wired directly in
// `api::create_router()`. Panic recovery is handled automatically by
// tower's ServiceBuilder.

use axum::extract::Request;
use std::time::Duration;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::info_span;
use uuid::Uuid;

/// Tracing middleware: request-id generation, structured request/response spans.
pub fn tracing_layer() -> impl tower::Layer<axum::routing::Route> + Clone + Send + 'static {
    TraceLayer::new_for_http()
        .make_span_with(|request: &Request| {
            let request_id = Uuid::new_v4();
            info_span!(
                "http_request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id
            )
        })
        .on_request(|_request: &Request, _span: &tracing::Span| {
            tracing::debug!("request started");
        })
        .on_response(|_response: &axum::response::Response, latency: Duration, _span: &tracing::Span| {
            tracing::info!(latency = ?latency, "request completed");
        })
        .on_failure(|_error: &tower_http::classify::ServerErrorsFailureClass, _latency: Duration, _span: &tracing::Span| {
            tracing::error!("request failed");
        })
}

/// Request body size limit middleware.
pub fn body_size_limit_layer(max_bytes: usize) -> impl tower::Layer<axum::routing::Route> + Clone + Send + 'static {
    RequestBodyLimitLayer::new(max_bytes)
}

/// Global request timeout middleware.
pub fn timeout_layer(timeout: Duration) -> impl tower::Layer<axum::routing::Route> + Clone + Send + 'static {
    tower::timeout::TimeoutLayer::new(timeout)
}
