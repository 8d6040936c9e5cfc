use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("model response contained no usable insights")]
    Parse,

    #[error("request superseded by a newer request for the same subject")]
    Superseded,

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Network and parse failures both degrade to fallback content.
    pub fn is_degradable(&self) -> bool {
        matches!(self, AppError::Upstream(_) | AppError::Timeout | AppError::Parse)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::RateLimitExceeded { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                format!("rate limit exceeded, retry after {}s", retry_after_secs),
            ),
            AppError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            AppError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "timeout_error",
                "upstream_timeout",
                "upstream request timed out".to_string(),
            ),
            AppError::Parse => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "unparseable_response",
                "model response contained no usable insights".to_string(),
            ),
            AppError::Superseded => (
                StatusCode::CONFLICT,
                "conflict_error",
                "superseded",
                "request superseded by a newer request".to_string(),
            ),
            AppError::DatasetNotFound(subject) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "dataset_not_found",
                format!("no performance data for '{}'", subject),
            ),
            AppError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                reason.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if let AppError::RateLimitExceeded { retry_after_secs } = self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}
