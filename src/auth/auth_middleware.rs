// Axum bearer-token authentication middleware.
//
// PolicyShield's auth surface is intentionally thin: a single optional
// shared-secret token (`POLICYSHIELD_API_TOKEN`). Absence of the token
// config means the server is open (spec §6).

use crate::api::responses::ErrorResponse;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthState {
    pub api_token: Option<String>,
}

/// Validates the `Authorization: Bearer <token>` header against the
/// configured token. When no token is configured, every request passes.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let Some(expected) = &auth_state.api_token else {
        return Ok(next.run(request).await);
    };

    let provided = extract_bearer_token(request.headers());
    if provided.as_deref() != Some(expected.as_str()) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "unauthenticated".to_string(),
                kind: "auth_error".to_string(),
            }),
        ));
    }

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}
