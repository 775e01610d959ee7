//! Shared API types and error handling.

use axum::{http::StatusCode, response::Json};
use fraud_core::{AnalysisInput, EngineError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for the analyse endpoints.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub email: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl AnalyzeRequest {
    pub fn into_input(self) -> AnalysisInput {
        AnalysisInput {
            email: self.email,
            ip: self.ip_address,
            user_agent: self.user_agent,
            request_id: self.request_id,
        }
    }
}

/// Standard error body. Upstream provider details never leak here.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub request_id: String,
    pub timestamp: String,
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// 400: the email failed syntactic validation.
    InvalidEmail(String),
    /// 404: unknown or expired job id.
    ResultNotFound,
    /// 503: a required collaborator is unavailable.
    ServiceUnavailable(String),
    /// 500: anything else; details go to the log, not the client.
    Internal,
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::InvalidSyntax(msg) => ApiError::InvalidEmail(msg),
            EngineError::Config(msg) => ApiError::ServiceUnavailable(msg),
            EngineError::Internal(e) => {
                tracing::error!(error = %e, "internal engine error");
                ApiError::Internal
            }
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message) = match self {
            ApiError::InvalidEmail(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_SYNTAX",
                format!("Invalid email format: {msg}"),
            ),
            ApiError::ResultNotFound => (
                StatusCode::NOT_FOUND,
                "RESULT_NOT_FOUND",
                "Result not found".to_string(),
            ),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal Server Error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            request_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(body)).into_response()
    }
}
