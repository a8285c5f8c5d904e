//! API error type and HTTP response mapping.
//!
//! Every failure leaves the service as a structured JSON body with a stable
//! machine-readable `code` and a human-readable `message`. Transition guard
//! failures additionally embed the entity's current status name so the
//! caller can explain the conflict without a second round trip.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::store::StoreError;
use crate::workflow::WorkflowError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
    /// Present on transition guard failures: the entity's current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
}

/// HTTP API error with a stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    current_status: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            current_status: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    #[cfg(test)]
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            code: self.code.to_string(),
            message: self.message,
            current_status: self.current_status,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
            }
            WorkflowError::InvalidTransition { ref current, .. } => {
                let current = current.clone();
                Self {
                    status: StatusCode::CONFLICT,
                    code: "INVALID_TRANSITION",
                    message: err.to_string(),
                    current_status: current,
                }
            }
            WorkflowError::InvalidVerdict { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_VERDICT",
                err.to_string(),
            ),
            WorkflowError::InvalidGrade { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_GRADE",
                err.to_string(),
            ),
            WorkflowError::AlreadyDecided(_) => {
                Self::new(StatusCode::CONFLICT, "ALREADY_DECIDED", err.to_string())
            }
            WorkflowError::EmptyRoster { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "EMPTY_ROSTER",
                err.to_string(),
            ),
            WorkflowError::Validation(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION",
                err.to_string(),
            ),
            WorkflowError::Store(store_err) => match store_err {
                StoreError::UnknownEntity(id) => {
                    Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("entity {id}"))
                }
                other => {
                    // Storage details stay out of the response body.
                    error!(error = %other, "storage failure");
                    Self::internal("internal storage error")
                }
            },
        }
    }
}
