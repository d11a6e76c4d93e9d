//! Data Transfer Objects for the HTTP API.
//!
//! Domain types that already derive `Serialize` (products, orders, repair
//! requests, quotes, profiles) are returned as-is inside [`ApiResponse`];
//! this module holds the request bodies, query strings and the few response
//! shapes that only exist on the wire.

use axum::{http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    AccountStatus, KycStatus, Order, OrderStatus, RepairQuote, RepairRequest, RepairStatus, Role,
};
use crate::services::auth::{LoginOutcome, Session};
use crate::services::{Page, PageRequest};

/// Success envelope: `{ "error": false, "code", "message", "data" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub error: bool,
    pub code: String,
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(code: impl Into<String>, message: impl Into<String>, data: T) -> Self {
        Self {
            error: false,
            code: code.into(),
            message: message.into(),
            data,
        }
    }
}

/// 200 with the success envelope.
pub fn ok<T>(code: &str, message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::new(code, message, data))
}

/// 201 with the success envelope.
pub fn created<T>(code: &str, message: &str, data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, ok(code, message, data))
}

/// Placeholder payload for responses that carry no data.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Empty {}

// =============================================================================
// Auth
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaCodeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfaVerifyRequest {
    pub challenge_token: String,
    pub code: String,
}

/// Login result. Either a session, or `mfa_required` with a challenge token.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub mfa_required: bool,
    #[serde(flatten)]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_expires_at: Option<DateTime<Utc>>,
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::Authenticated(session) => Self {
                mfa_required: false,
                session: Some(session),
                challenge_token: None,
                challenge_expires_at: None,
            },
            LoginOutcome::MfaRequired(challenge) => Self {
                mfa_required: true,
                session: None,
                challenge_token: Some(challenge.challenge_token),
                challenge_expires_at: Some(challenge.expires_at),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutAllResponse {
    pub revoked_sessions: usize,
}

// =============================================================================
// Listing queries
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        PageRequest {
            page: self.page,
            limit: self.limit,
        }
        .normalize()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub role: Option<Role>,
    pub status: Option<AccountStatus>,
    pub kyc_status: Option<KycStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowseQuery {
    pub category: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepairListQuery {
    pub status: Option<RepairStatus>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Page window from loose `page`/`limit` query values.
pub fn page_of(page: Option<u64>, limit: Option<u64>) -> Page {
    PageRequest { page, limit }.normalize()
}

// =============================================================================
// Admin
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UserStatusRequest {
    pub status: AccountStatus,
}

// =============================================================================
// Catalog
// =============================================================================

/// Items are kept as raw JSON so one malformed entry does not reject the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkUploadRequest {
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub orders: Vec<Order>,
    pub total_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusRequest {
    pub status: OrderStatus,
}

// =============================================================================
// Repair
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct QuoteDecisionResponse {
    pub quote: RepairQuote,
    pub request: RepairRequest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepairStatusRequest {
    pub status: RepairStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub repository: String,
}
