//! HTTP error mapping
//!
//! The taxonomy on the wire: user-triggered problems surface as 401/422,
//! infrastructure problems as 503 so the caller can retry, anything else
//! as 500. Quota denial is never an error; it is an `allowed=false`
//! response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use meterd_core::MeterError;

/// Error type returned by every handler.
#[derive(Debug)]
pub enum ApiError {
    /// 401: missing, unknown, inactive or expired API key
    Unauthorized(String),
    /// 422: malformed input or out-of-range values
    Validation(String),
    /// 503: a backing store is unavailable
    Unavailable(String),
    /// 500: everything else
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            ApiError::Validation(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::Unavailable(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail),
            ApiError::Internal(detail) => {
                error!("internal error on request: {}", detail);
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<MeterError> for ApiError {
    fn from(e: MeterError) -> Self {
        match e {
            MeterError::Validation(v) => ApiError::Validation(v.to_string()),
            MeterError::Authentication(a) => ApiError::Unauthorized(a.to_string()),
            MeterError::Cache(c) => ApiError::Unavailable(c.to_string()),
            MeterError::Event(ev) => ApiError::Unavailable(ev.to_string()),
            MeterError::Aggregation(a) => ApiError::Unavailable(a.to_string()),
            MeterError::Quota(q) => ApiError::Unavailable(q.to_string()),
            MeterError::Config(msg) => ApiError::Internal(msg),
            MeterError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}
