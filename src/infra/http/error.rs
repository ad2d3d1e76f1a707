use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::error::DomainError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    /// The target job exists but has not succeeded yet; distinct from
    /// `not_found` so pollers can tell "keep waiting" from "never existed".
    pub const NOT_READY: &str = "not_ready";
    pub const CONFLICT: &str = "conflict";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const SCHEDULER: &str = "scheduler_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn not_ready(hint: Option<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            codes::NOT_READY,
            "Artifact is not ready yet",
            hint,
        )
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound { .. } => ApiError::not_found("Resource not found"),
            DomainError::Conflict { message } => ApiError::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                "Conflicting request",
                Some(message),
            ),
            DomainError::InvalidTransition { .. } => ApiError::new(
                StatusCode::CONFLICT,
                codes::INVALID_TRANSITION,
                "Job is not in a state that allows this operation",
                Some(err.to_string()),
            ),
            DomainError::Render { .. } | DomainError::Timeout { .. } | DomainError::Cancelled { .. } => {
                // Render outcomes live on the job record, not on the request
                // path; reaching here means a scheduling-side failure.
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    codes::SCHEDULER,
                    "Scheduler failure",
                    Some(err.to_string()),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        (self.status, Json(body)).into_response()
    }
}
