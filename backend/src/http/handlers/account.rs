//! Authenticated account endpoints shared by every role group.

use axum::extract::State;

use super::HandlerResult;
use crate::http::dto::{ok, ChangePasswordRequest, Empty, LogoutAllResponse};
use crate::http::extract::{ApiJson, Authed, RoleGuard};
use crate::http::state::AppState;
use crate::models::UserProfile;
use crate::services::accounts::{KycSubmission, ProfileUpdate};

/// GET /profile
pub async fn get_profile<R: RoleGuard>(
    State(state): State<AppState>,
    caller: Authed<R>,
) -> HandlerResult<UserProfile> {
    let profile = state.services.accounts.get_profile(caller.id()).await?;
    Ok(ok("PROFILE", "profile retrieved", profile))
}

/// PUT /profile
pub async fn update_profile<R: RoleGuard>(
    State(state): State<AppState>,
    caller: Authed<R>,
    ApiJson(update): ApiJson<ProfileUpdate>,
) -> HandlerResult<UserProfile> {
    let profile = state
        .services
        .accounts
        .update_profile(caller.id(), update)
        .await?;
    Ok(ok("PROFILE_UPDATED", "profile updated", profile))
}

/// POST /profile/password
pub async fn change_password<R: RoleGuard>(
    State(state): State<AppState>,
    caller: Authed<R>,
    ApiJson(body): ApiJson<ChangePasswordRequest>,
) -> HandlerResult<Empty> {
    state
        .services
        .auth
        .change_password(caller.id(), &body.current_password, &body.new_password)
        .await?;
    Ok(ok(
        "PASSWORD_CHANGED",
        "password changed; other sessions were signed out",
        Empty::default(),
    ))
}

/// POST /auth/logout-all
pub async fn logout_all<R: RoleGuard>(
    State(state): State<AppState>,
    caller: Authed<R>,
) -> HandlerResult<LogoutAllResponse> {
    let revoked_sessions = state.services.auth.logout_all(caller.id()).await?;
    Ok(ok(
        "LOGGED_OUT_ALL",
        "all sessions revoked",
        LogoutAllResponse { revoked_sessions },
    ))
}

/// POST /kyc
pub async fn submit_kyc<R: RoleGuard>(
    State(state): State<AppState>,
    caller: Authed<R>,
    ApiJson(submission): ApiJson<KycSubmission>,
) -> HandlerResult<UserProfile> {
    let profile = state
        .services
        .accounts
        .submit_kyc(caller.id(), submission)
        .await?;
    Ok(ok("KYC_SUBMITTED", "verification submitted for review", profile))
}
