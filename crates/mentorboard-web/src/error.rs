//! JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mentorboard_core::{CoreError, RefreshError};
use tracing::error;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::RecordNotFound { .. } => {
                return Self::new(StatusCode::NOT_FOUND, "dashboard not ready yet")
            }
            CoreError::InvalidSubject { .. } => StatusCode::BAD_REQUEST,
            CoreError::Refresh(refresh) => match refresh {
                RefreshError::SubjectNotFound { .. } => StatusCode::NOT_FOUND,
                RefreshError::ClaimHeld { .. } => StatusCode::CONFLICT,
                RefreshError::SourceUnavailable { .. } | RefreshError::ClaimTimeout { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                RefreshError::Computation { .. } | RefreshError::Store { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            CoreError::Source(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %err, "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}
