//! Error types for the gateway layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use roomcast_realtime::RealtimeError;
use serde_json::json;
use thiserror::Error;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            GatewayError::AuthorizationFailed(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthenticationFailed(_) => "unauthenticated",
            GatewayError::AuthorizationFailed(_) => "forbidden",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::NotFound(_) => "not_found",
            GatewayError::ServiceUnavailable => "service_unavailable",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_response = json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        (status, Json(error_response)).into_response()
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<RealtimeError> for GatewayError {
    fn from(error: RealtimeError) -> Self {
        match error {
            RealtimeError::Unauthenticated => {
                GatewayError::AuthenticationFailed("invalid or missing token".to_string())
            }
            RealtimeError::NotAMember { .. } => GatewayError::AuthorizationFailed(error.to_string()),
            RealtimeError::ContentTooLarge { .. } | RealtimeError::InvalidPayload(_) => {
                GatewayError::InvalidRequest(error.to_string())
            }
            RealtimeError::NotFound(what) => GatewayError::NotFound(what),
            RealtimeError::MembershipUnavailable
            | RealtimeError::PersistFailure
            | RealtimeError::StorageUnavailable => GatewayError::ServiceUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_errors_map_to_http_statuses() {
        let cases = [
            (RealtimeError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (RealtimeError::not_a_member("r1"), StatusCode::FORBIDDEN),
            (RealtimeError::invalid("bad"), StatusCode::BAD_REQUEST),
            (
                RealtimeError::NotFound("message".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                RealtimeError::MembershipUnavailable,
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(GatewayError::from(error).status_code(), status);
        }
    }

    #[test]
    fn unauthenticated_response_is_json_401() {
        let response = GatewayError::from(RealtimeError::Unauthenticated).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("application/json")
        );
    }
}
