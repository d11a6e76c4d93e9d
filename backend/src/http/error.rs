//! HTTP error handling and the error envelope.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::services::{codes, ServiceError};

/// Error response body: `{ "error": true, "code": "...", "message": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: bool,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: true,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// A business rule or storage failure from the service layer
    Service(ServiceError),
    /// Body, query or path could not be parsed
    InvalidRequest(String),
    /// No route matched
    NotFound,
}

impl AppError {
    fn status_and_body(&self) -> (StatusCode, ApiError) {
        match self {
            AppError::Service(err) => {
                let status = match err {
                    ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
                    ServiceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
                    ServiceError::Forbidden { .. } => StatusCode::FORBIDDEN,
                    ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
                    ServiceError::Conflict { .. } => StatusCode::CONFLICT,
                    ServiceError::Repository(e) if e.is_retryable() => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    ServiceError::Repository(_) | ServiceError::Internal(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, ApiError::new(err.code(), err.public_message()))
            }
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::new(codes::INVALID_REQUEST, msg.clone()),
            ),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                ApiError::new(codes::NOT_FOUND, "route not found"),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        if status.is_server_error() {
            // Full detail goes to the log only.
            if let AppError::Service(err) = &self {
                error!(code = %body.code, error = %err, "request failed");
            }
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(code = %body.code, "request denied");
        }
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        AppError::Service(err)
    }
}

impl From<crate::db::repository::RepositoryError> for AppError {
    fn from(err: crate::db::repository::RepositoryError) -> Self {
        AppError::Service(err.into())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_status_classes() {
        let cases = [
            (ServiceError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                ServiceError::unauthorized(codes::INVALID_TOKEN, "no"),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ServiceError::forbidden(codes::KYC_REQUIRED, "no"),
                StatusCode::FORBIDDEN,
            ),
            (
                ServiceError::not_found(codes::ORDER_NOT_FOUND, "gone"),
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::invalid_transition("pending", "completed"),
                StatusCode::CONFLICT,
            ),
            (ServiceError::internal("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let (status, body) = AppError::from(err).status_and_body();
            assert_eq!(status, expected);
            assert!(body.error);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let (_, body) = AppError::from(ServiceError::internal("secret detail")).status_and_body();
        assert_eq!(body.code, codes::INTERNAL_ERROR);
        assert!(!body.message.contains("secret"));
    }
}
