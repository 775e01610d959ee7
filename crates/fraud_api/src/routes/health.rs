//! Health and readiness probes.

use crate::AppState;
use axum::{extract::State, response::Json};
use fraud_core::KvStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub timestamp: String,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.store.ping().await {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "health check: store unreachable");
            "unreachable"
        }
    };
    Json(HealthResponse {
        status: if store == "connected" {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub disposable_domains: usize,
}

/// GET /ready
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> Json<ReadinessResponse> {
    let ready = state.store.ping().await.is_ok() && state.registry.domain_count() > 0;
    Json(ReadinessResponse {
        ready,
        disposable_domains: state.registry.domain_count(),
    })
}
