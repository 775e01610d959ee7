//! Analysis endpoints.

use crate::api_handler::{AnalyzeRequest, ApiError, ApiResult};
use crate::middleware::extract_client_ip;
use crate::AppState;
use axum::{extract::State, http::HeaderMap, response::Json};
use fraud_core::engine::AnalysisMode;
use fraud_core::{enrichment, EnrichmentInfo, Envelope};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// POST /api/v1/analyse
///
/// Runs every enabled probe synchronously and returns the fully scored
/// envelope.
pub async fn analyse_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Envelope> {
    let mut input = request.into_input();
    if input.ip.is_none() {
        input.ip = extract_client_ip(&headers);
    }

    let envelope = state
        .engine
        .analyse(&input, AnalysisMode::Full)
        .await
        .map_err(ApiError::from)?;

    state
        .notifier
        .spawn_notify(&envelope, input.ip.as_deref(), input.user_agent.as_deref());

    Ok(Json(envelope))
}

/// POST /api/v1/analyse/fast
///
/// Low-latency path: cheap signals only. When background enrichment is
/// enabled the slow probes run later via the job queue and the response
/// carries a pending job id; a store outage silently downgrades to DISABLED.
pub async fn analyse_fast_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Envelope> {
    let mut input = request.into_input();
    if input.ip.is_none() {
        input.ip = extract_client_ip(&headers);
    }

    let mut envelope = state
        .engine
        .analyse(&input, AnalysisMode::Fast)
        .await
        .map_err(ApiError::from)?;

    if state.config.enrichment.enable_background_enrichment {
        let ttl = Duration::from_secs(state.config.enrichment.result_ttl_secs);
        match enrichment::enqueue_job(state.store.as_ref(), &input, &envelope, ttl).await {
            Ok(job_id) => {
                debug!(job_id, "background enrichment scheduled");
                envelope.enrichment = EnrichmentInfo::pending(job_id);
            }
            Err(e) => {
                warn!(error = %e, "enrichment unavailable for this call");
                envelope.enrichment = EnrichmentInfo::disabled();
            }
        }
    }

    state
        .notifier
        .spawn_notify(&envelope, input.ip.as_deref(), input.user_agent.as_deref());

    Ok(Json(envelope))
}
