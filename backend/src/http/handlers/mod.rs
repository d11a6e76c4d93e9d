//! HTTP handlers for the REST API.
//!
//! Handlers parse input, call one service operation and wrap the result in
//! the success envelope. Shared auth and account handlers are generic over
//! the route group's [`RoleGuard`](super::extract::RoleGuard) so every role
//! prefix gets its own copy.

pub mod account;
pub mod admin;
pub mod auth;
pub mod buyer;
pub mod repair_center;
pub mod seller;

use axum::{extract::State, http::StatusCode, Json};

use super::dto::{ok, ApiResponse, HealthResponse};
use super::error::AppError;
use super::state::AppState;
use crate::db::repository::UserRepository;
use crate::services::ServiceError;

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// Result type for handlers that create a resource (201).
pub type CreatedResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
///
/// Reports 503 when the repository cannot be reached.
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    match state.repository.health_check().await {
        Ok(true) => Ok(ok(
            "HEALTHY",
            "service is healthy",
            HealthResponse {
                status: "ok".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                repository: "connected".to_string(),
            },
        )),
        Ok(false) => Err(ServiceError::unavailable("repository reported unhealthy").into()),
        Err(e) => Err(ServiceError::from(e).into()),
    }
}

/// Fallback for unmatched routes.
pub async fn not_found() -> AppError {
    AppError::NotFound
}
