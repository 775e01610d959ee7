//! Admin authentication.
//!
//! Admin and stats routes require `X-Admin-API-Key`. An empty configured key
//! is a dev-only convenience: outside dev the guard fails closed with 503 so
//! a misconfigured deployment can never expose the admin surface.

use crate::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{info, warn};

pub const ADMIN_KEY_HEADER: &str = "x-admin-api-key";

pub async fn require_admin_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.config.security.admin_api_key.trim();
    let path = request.uri().path().to_string();

    if expected.is_empty() {
        if !state.config.is_dev() {
            warn!(path, "admin endpoint hit with no admin key configured");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Admin API key not configured",
            )
                .into_response();
        }
        warn!("admin_api_key is not set; admin endpoints are unprotected (dev mode)");
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if key == expected => {
            info!(path, "admin auth succeeded");
            next.run(request).await
        }
        _ => {
            warn!(path, "admin auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}
