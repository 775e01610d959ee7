//! Admin statistics and counter management.
//!
//! All handlers here sit behind the `X-Admin-API-Key` guard. They read
//! operational state straight from the store: velocity counters and the
//! per-domain recent-email windows.

use crate::api_handler::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::response::Json;
use fraud_core::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub total_unique_ips: usize,
    pub total_unique_domains: usize,
    pub recent_signups_tracked: usize,
    pub timestamp: String,
}

/// GET /api/v1/stats/overview
pub async fn overview_handler(State(state): State<Arc<AppState>>) -> ApiResult<OverviewResponse> {
    let store = state.store.as_ref();
    let ip_keys = store
        .scan_keys("vel:ip:")
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;
    let domain_keys = store
        .scan_keys("vel:domain:")
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;
    let window_keys = store
        .scan_keys("recent:")
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    let mut tracked = 0;
    for key in &window_keys {
        tracked += store.list_len(key).await.unwrap_or(0);
    }

    Ok(Json(OverviewResponse {
        total_unique_ips: ip_keys.len(),
        total_unique_domains: domain_keys.len(),
        recent_signups_tracked: tracked,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecentIpsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct IpActivity {
    pub ip: String,
    pub count: i64,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RecentIpsResponse {
    pub ip_activity: Vec<IpActivity>,
    pub total_tracked: usize,
}

/// GET /api/v1/stats/recent-ips?limit=N
pub async fn recent_ips_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentIpsQuery>,
) -> ApiResult<RecentIpsResponse> {
    let store = state.store.as_ref();
    let keys = store
        .scan_keys("vel:ip:")
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    let mut activity = Vec::with_capacity(keys.len());
    for key in &keys {
        // Key shape: vel:ip:{ip}:{hour_bucket}.
        let Some(ip) = key
            .strip_prefix("vel:ip:")
            .and_then(|rest| rest.rsplit_once(':'))
            .map(|(ip, _bucket)| ip.to_string())
        else {
            continue;
        };
        let count = store
            .get(key)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let ttl_seconds = store
            .ttl(key)
            .await
            .ok()
            .flatten()
            .map(|d| d.as_secs());
        activity.push(IpActivity {
            ip,
            count,
            ttl_seconds,
        });
    }
    activity.sort_by(|a, b| b.count.cmp(&a.count));
    let total_tracked = activity.len();
    activity.truncate(query.limit);

    Ok(Json(RecentIpsResponse {
        ip_activity: activity,
        total_tracked,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RecentEmailsQuery {
    pub domain: String,
}

#[derive(Debug, Serialize)]
pub struct RecentEmailsResponse {
    pub domain: String,
    pub recent_emails: Vec<String>,
    pub count: usize,
}

/// GET /api/v1/stats/recent-emails?domain=example.com
pub async fn recent_emails_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RecentEmailsQuery>,
) -> ApiResult<RecentEmailsResponse> {
    let emails = state
        .store
        .list_range(&format!("recent:{}", query.domain.to_lowercase()))
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;
    let count = emails.len();
    Ok(Json(RecentEmailsResponse {
        domain: query.domain.to_lowercase(),
        recent_emails: emails,
        count,
    }))
}

#[derive(Debug, Serialize)]
pub struct ClearVelocityResponse {
    pub success: bool,
    pub message: String,
}

/// POST /api/v1/admin/clear-velocity/{ip}
///
/// Drops every live velocity bucket for the IP.
pub async fn clear_velocity_handler(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> ApiResult<ClearVelocityResponse> {
    let store = state.store.as_ref();
    let keys = store
        .scan_keys(&format!("vel:ip:{ip}:"))
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;

    let mut deleted = 0;
    for key in &keys {
        if store.delete(key).await.unwrap_or(false) {
            deleted += 1;
        }
    }
    info!(ip, deleted, "velocity counters cleared");

    Ok(Json(ClearVelocityResponse {
        success: deleted > 0,
        message: if deleted > 0 {
            format!("Cleared velocity for {ip}")
        } else {
            format!("No data found for {ip}")
        },
    }))
}
