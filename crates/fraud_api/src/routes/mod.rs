//! HTTP route tree.
//!
//! - `analyse`: full and fast analysis endpoints
//! - `results`: poll-by-id for background enrichment
//! - `admin`: velocity/pattern statistics and counter management (key-gated)
//! - `health`: liveness and readiness probes

pub mod admin;
pub mod analyse;
pub mod health;
pub mod results;

use crate::{auth, AppState};
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Assemble every route with shared state and the request-id layer.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/api/v1/stats/overview", get(admin::overview_handler))
        .route("/api/v1/stats/recent-ips", get(admin::recent_ips_handler))
        .route(
            "/api/v1/stats/recent-emails",
            get(admin::recent_emails_handler),
        )
        .route(
            "/api/v1/admin/clear-velocity/:ip",
            post(admin::clear_velocity_handler),
        )
        .layer(from_fn_with_state(state.clone(), auth::require_admin_key));

    Router::new()
        .route("/api/v1/analyse", post(analyse::analyse_handler))
        .route("/api/v1/analyse/fast", post(analyse::analyse_fast_handler))
        .route("/api/v1/results/:job_id", get(results::result_handler))
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .merge(admin_routes)
        .layer(from_fn(crate::middleware::request_id))
        .with_state(state)
}
