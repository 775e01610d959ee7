//! Poll-by-id endpoint for background enrichment results.

use crate::api_handler::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::Json;
use fraud_core::{enrichment, Envelope};
use std::sync::Arc;

/// GET /api/v1/results/{job_id}
///
/// Returns the envelope stored for the job: PENDING right after enqueue,
/// COMPLETE (or FAILED) once a worker has processed it, 404 when the id is
/// unknown or the result expired.
pub async fn result_handler(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Envelope> {
    let result = enrichment::get_result(state.store.as_ref(), &job_id)
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;
    match result {
        Some(envelope) => Ok(Json(envelope)),
        None => Err(ApiError::ResultNotFound),
    }
}
