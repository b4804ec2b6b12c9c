//! HTTP error mapping.

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::{FieldError, PayloadError};

/// Errors that change the HTTP status of a request.
///
/// Everything that happens after validation (recovery, notification,
/// archiving) is reported in the response body instead.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid `X-Signature`
    #[error("unauthorized")]
    Unauthorized,

    /// Body is not JSON or violates the schema
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// Route quota exhausted
    #[error("rate limit exceeded")]
    RateLimited {
        /// Time until the window resets
        retry_after: Duration,
    },

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            Self::Payload(PayloadError::Malformed(e)) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON payload", "details": [e.to_string()] })),
            )
                .into_response(),
            Self::Payload(PayloadError::Invalid(errors)) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "Invalid alert payload",
                    "details": errors.iter().map(FieldError::to_string).collect::<Vec<_>>(),
                })),
            )
                .into_response(),
            Self::RateLimited { retry_after } => {
                // Round up so clients never retry inside the same window.
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "Rate limit exceeded" })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
                response
            }
            Self::Internal(message) => {
                error!(error = %message, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Unauthorized.into_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Payload(PayloadError::Invalid(vec![])).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("disk".to_string()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited {
            retry_after: Duration::from_millis(12_500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
    }
}
