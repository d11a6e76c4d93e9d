//! Public `/auth/*` endpoints, instantiated once per role group.

use axum::extract::State;

use super::{CreatedResult, HandlerResult};
use crate::http::dto::{
    created, ok, EmailRequest, Empty, LoginRequest, LoginResponse, MfaVerifyRequest,
    RefreshRequest, ResetPasswordRequest, TokenRequest,
};
use crate::http::extract::{ApiJson, RoleGuard};
use crate::http::state::AppState;
use crate::models::UserProfile;
use crate::services::auth::{RegisterInput, Session};

/// POST /auth/register
pub async fn register<R: RoleGuard>(
    State(state): State<AppState>,
    ApiJson(input): ApiJson<RegisterInput>,
) -> CreatedResult<UserProfile> {
    let profile = state.services.auth.register(R::ROLE, input).await?;
    Ok(created(
        "REGISTERED",
        "account created; check your email to verify it",
        profile,
    ))
}

/// POST /auth/login
pub async fn login<R: RoleGuard>(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> HandlerResult<LoginResponse> {
    let outcome = state
        .services
        .auth
        .login(R::ROLE, &body.email, &body.password)
        .await?;
    let response = LoginResponse::from(outcome);
    let (code, message) = if response.mfa_required {
        ("MFA_REQUIRED", "enter your authentication code")
    } else {
        ("LOGIN_SUCCESS", "logged in")
    };
    Ok(ok(code, message, response))
}

/// POST /auth/mfa/verify
pub async fn verify_mfa<R: RoleGuard>(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<MfaVerifyRequest>,
) -> HandlerResult<Session> {
    let session = state
        .services
        .auth
        .verify_mfa(R::ROLE, &body.challenge_token, &body.code)
        .await?;
    Ok(ok("LOGIN_SUCCESS", "logged in", session))
}

/// POST /auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> HandlerResult<Session> {
    let session = state.services.auth.refresh(&body.refresh_token).await?;
    Ok(ok("TOKEN_REFRESHED", "session refreshed", session))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RefreshRequest>,
) -> HandlerResult<Empty> {
    state.services.auth.logout(&body.refresh_token).await?;
    Ok(ok("LOGGED_OUT", "logged out", Empty::default()))
}

/// POST /auth/verify-email
pub async fn verify_email(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<TokenRequest>,
) -> HandlerResult<UserProfile> {
    let profile = state.services.auth.verify_email(&body.token).await?;
    Ok(ok("EMAIL_VERIFIED", "email verified", profile))
}

/// POST /auth/resend-verification
pub async fn resend_verification(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<EmailRequest>,
) -> HandlerResult<Empty> {
    state.services.auth.resend_verification(&body.email).await?;
    Ok(ok(
        "VERIFICATION_SENT",
        "if the account exists and is unverified, a new link has been sent",
        Empty::default(),
    ))
}

/// POST /auth/forgot-password
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<EmailRequest>,
) -> HandlerResult<Empty> {
    state.services.auth.forgot_password(&body.email).await?;
    Ok(ok(
        "RESET_SENT",
        "if the account exists, a reset link has been sent",
        Empty::default(),
    ))
}

/// POST /auth/reset-password
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ResetPasswordRequest>,
) -> HandlerResult<Empty> {
    state
        .services
        .auth
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(ok("PASSWORD_RESET", "password updated; log in again", Empty::default()))
}
