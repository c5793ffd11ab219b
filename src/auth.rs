use crate::config::ServerConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// Holds the configured API key the middleware checks requests against.
#[derive(Clone)]
pub struct AuthState {
    pub config: ServerConfig,
}

/// Constant-time API-key check. Bypasses CORS preflight and the
/// unauthenticated liveness probe; every other route requires a key.
pub async fn auth_middleware(State(auth_state): State<Arc<AuthState>>, headers: HeaderMap, request: Request, next: Next) -> Result<Response, Response> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    if method == Method::OPTIONS || path == "/healthz" {
        return Ok(next.run(request).await);
    }

    let provided_key = if let Some(header_value) = headers.get("x-api-key") {
        header_value.to_str().map_err(|_| unauthorized())?
    } else if let Some(header_value) = headers.get("authorization") {
        let auth_str = header_value.to_str().map_err(|_| unauthorized())?;
        match auth_str.strip_prefix("Bearer ") {
            Some(token) => token,
            None => {
                warn!(path, client_ip, "authorization header missing Bearer prefix");
                return Err(unauthorized());
            }
        }
    } else {
        warn!(path, client_ip, "missing API key");
        return Err(unauthorized());
    };

    match &auth_state.config.api_key {
        Some(expected_key) => {
            use subtle::ConstantTimeEq;
            if provided_key.as_bytes().ct_eq(expected_key.as_bytes()).into() {
                Ok(next.run(request).await)
            } else {
                warn!(path, client_ip, "invalid API key");
                Err(unauthorized())
            }
        }
        None => {
            warn!("API authentication enabled but no API key configured");
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "Internal Server Error"}))).into_response())
        }
    }
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
}

/// `config.api_key` must already be populated (see `security::ensure_api_key_exists`,
/// called once at startup) or every request hits the `None` branch above.
pub fn create_auth_state(config: ServerConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}
