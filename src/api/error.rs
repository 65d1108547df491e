//! API error handling.
//!
//! Every failure is answered with a JSON `{code, message}` body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::{EncoderError, NegotiationError, TunnelError};

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<NegotiationError> for ApiError {
    fn from(err: NegotiationError) -> Self {
        log::warn!("Offer rejected: {}", err);
        ApiError::new(StatusCode::BAD_REQUEST, "NEGOTIATION_FAILED", err.to_string())
    }
}

impl From<EncoderError> for ApiError {
    fn from(err: EncoderError) -> Self {
        match err {
            EncoderError::AlreadyRunning(_) => ApiError::conflict(err.to_string()),
            EncoderError::InvalidDestination { .. } => ApiError::bad_request(err.to_string()),
            EncoderError::StartAborted(_) => ApiError::conflict(err.to_string()),
            EncoderError::Launch { .. } | EncoderError::Io { .. } => {
                log::error!("Encoder error: {}", err);
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<TunnelError> for ApiError {
    fn from(err: TunnelError) -> Self {
        log::error!("Tunnel error: {}", err);
        ApiError::internal(err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::EncoderRole;

    #[test]
    fn test_encoder_error_mapping() {
        let err: ApiError = EncoderError::AlreadyRunning(EncoderRole::Record).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.message, "record encoder is already running");

        let err: ApiError = EncoderError::InvalidDestination {
            role: EncoderRole::Live,
            reason: "empty url".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = EncoderError::Launch {
            role: EncoderRole::Live,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg"),
        }
        .into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code, "INTERNAL_ERROR");
    }

    #[test]
    fn test_negotiation_error_is_bad_request() {
        let err: ApiError = NegotiationError::MissingAnswer.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "NEGOTIATION_FAILED");
    }
}
