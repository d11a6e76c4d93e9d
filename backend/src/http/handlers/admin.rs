//! Admin-only endpoints: MFA management, user moderation and the audit log.

use axum::extract::State;

use super::HandlerResult;
use crate::db::repository::AuditRepository;
use crate::http::dto::{ok, page_of, Empty, MfaCodeRequest, PageQuery, UserListQuery, UserStatusRequest};
use crate::http::extract::{AdminUser, ApiJson, ApiPath, ApiQuery};
use crate::http::state::AppState;
use crate::models::{AuditEntry, UserFilter, UserId, UserProfile};
use crate::services::accounts::KycDecision;
use crate::services::auth::MfaSetup;
use crate::services::{Paginated, ServiceError};

// =============================================================================
// MFA
// =============================================================================

/// POST /api/admin/auth/mfa/setup
pub async fn mfa_setup(State(state): State<AppState>, admin: AdminUser) -> HandlerResult<MfaSetup> {
    let setup = state.services.auth.mfa_setup(admin.id()).await?;
    Ok(ok(
        "MFA_SETUP",
        "scan the secret, then confirm with a code to enable MFA",
        setup,
    ))
}

/// POST /api/admin/auth/mfa/enable
pub async fn mfa_enable(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiJson(body): ApiJson<MfaCodeRequest>,
) -> HandlerResult<Empty> {
    state.services.auth.mfa_enable(admin.id(), &body.code).await?;
    Ok(ok("MFA_ENABLED", "MFA enabled", Empty::default()))
}

/// POST /api/admin/auth/mfa/disable
pub async fn mfa_disable(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiJson(body): ApiJson<MfaCodeRequest>,
) -> HandlerResult<Empty> {
    state.services.auth.mfa_disable(admin.id(), &body.code).await?;
    Ok(ok("MFA_DISABLED", "MFA disabled", Empty::default()))
}

// =============================================================================
// Users
// =============================================================================

/// GET /api/admin/users
pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<UserListQuery>,
) -> HandlerResult<Paginated<UserProfile>> {
    let filter = UserFilter {
        role: query.role,
        status: query.status,
        kyc_status: query.kyc_status,
    };
    let users = state
        .services
        .accounts
        .list_users(&filter, page_of(query.page, query.limit))
        .await?;
    Ok(ok("USERS", "users retrieved", users))
}

/// PATCH /api/admin/users/{id}/status
pub async fn set_user_status(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(user_id): ApiPath<UserId>,
    ApiJson(body): ApiJson<UserStatusRequest>,
) -> HandlerResult<UserProfile> {
    let profile = state
        .services
        .accounts
        .set_user_status(admin.id(), user_id, body.status)
        .await?;
    Ok(ok("USER_STATUS_UPDATED", "account status updated", profile))
}

/// POST /api/admin/users/{id}/kyc
pub async fn review_kyc(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(user_id): ApiPath<UserId>,
    ApiJson(decision): ApiJson<KycDecision>,
) -> HandlerResult<UserProfile> {
    let profile = state
        .services
        .accounts
        .review_kyc(admin.id(), user_id, decision)
        .await?;
    Ok(ok("KYC_REVIEWED", "verification reviewed", profile))
}

// =============================================================================
// Audit
// =============================================================================

/// GET /api/admin/audit-logs
///
/// Newest first.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> HandlerResult<Paginated<AuditEntry>> {
    let page = query.page();
    let (entries, total) = state
        .repository
        .list_audit(page.offset(), page.limit)
        .await
        .map_err(ServiceError::from)?;
    Ok(ok("AUDIT_LOGS", "audit entries retrieved", page.wrap(entries, total)))
}
