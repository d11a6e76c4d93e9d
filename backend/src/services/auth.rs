//! Authentication flows: registration, login, session rotation, account
//! recovery and admin MFA.
//!
//! Sessions are a short-lived access JWT plus an opaque refresh token. Only
//! the refresh token's digest is stored, and every refresh swaps it for a new
//! one in a single repository call. Presenting a token that was already
//! swapped out revokes every session of its owner.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::error::{codes, ServiceError, ServiceResult};
use super::notifier::Notifier;
use crate::auth::{
    check_password_policy, generate_token, hash_password, token_digest, totp, verify_password,
    JwtKeys, TokenType,
};
use crate::config::AuthSettings;
use crate::db::repository::{FullRepository, TokenRepository, UserRepository, UserUpdate};
use crate::models::{
    NewOneTimeToken, NewRefreshToken, NewUser, Role, RotationOutcome, TokenPurpose, User, UserId,
    UserProfile,
};

const MAX_EMAIL_LEN: usize = 254;

/// Self-service registration payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize)]
pub struct MfaChallenge {
    pub challenge_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Session),
    /// Password accepted; a TOTP code is still needed.
    MfaRequired(MfaChallenge),
}

#[derive(Debug, Clone, Serialize)]
pub struct MfaSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

/// Lower-case and sanity-check an email address.
pub fn normalize_email(raw: &str) -> ServiceResult<String> {
    let email = raw.trim().to_lowercase();
    let invalid = || ServiceError::validation("a valid email address is required");

    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || domain.contains("..")
    {
        return Err(invalid());
    }
    Ok(email)
}

fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn hash_blocking(password: String) -> ServiceResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ServiceError::internal(format!("password hashing task failed: {e}")))?
        .map_err(|e| ServiceError::internal(e.to_string()))
}

async fn verify_blocking(password: String, stored_hash: String) -> ServiceResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| ServiceError::internal(format!("password verification task failed: {e}")))
}

fn invalid_credentials() -> ServiceError {
    ServiceError::unauthorized(codes::INVALID_CREDENTIALS, "invalid email or password")
}

fn mfa_already_enabled() -> ServiceError {
    ServiceError::conflict(codes::MFA_ALREADY_ENABLED, "MFA is already enabled")
}

fn suspended() -> ServiceError {
    ServiceError::forbidden(codes::ACCOUNT_SUSPENDED, "account is suspended")
}

#[derive(Clone)]
pub struct AuthService {
    repo: Arc<dyn FullRepository>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    keys: JwtKeys,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        repo: Arc<dyn FullRepository>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        settings: AuthSettings,
    ) -> Self {
        let keys = JwtKeys::new(settings.jwt_secret.as_bytes(), settings.issuer.clone());
        Self {
            repo,
            clock,
            notifier,
            keys,
            settings,
        }
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    // =========================================================================
    // Registration and login
    // =========================================================================

    pub async fn register(&self, role: Role, input: RegisterInput) -> ServiceResult<UserProfile> {
        if !role.can_self_register() {
            return Err(ServiceError::forbidden(
                codes::FORBIDDEN,
                "this role cannot self-register",
            ));
        }
        let email = normalize_email(&input.email)?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ServiceError::validation("name is required"));
        }
        check_password_policy(&input.password)
            .map_err(|msg| ServiceError::validation_code(codes::WEAK_PASSWORD, msg))?;

        let password_hash = hash_blocking(input.password).await?;
        let user = self
            .repo
            .create_user(NewUser {
                email,
                password_hash,
                name,
                phone: clean_optional(input.phone),
                role,
                email_verified: false,
            })
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    ServiceError::conflict(codes::EMAIL_IN_USE, "email is already registered")
                } else {
                    e.into()
                }
            })?;

        info!(user_id = %user.id, role = %role, "account registered");
        self.send_verification(&user).await?;
        Ok(UserProfile::from(&user))
    }

    /// Password login scoped to `role`. A role mismatch looks exactly like a
    /// wrong password.
    pub async fn login(&self, role: Role, email: &str, password: &str) -> ServiceResult<LoginOutcome> {
        let email = normalize_email(email).map_err(|_| invalid_credentials())?;
        let user = match self.repo.find_user_by_email(&email).await? {
            Some(user) => user,
            None => {
                debug!("login for unknown email");
                return Err(invalid_credentials());
            }
        };

        let password_ok = verify_blocking(password.to_string(), user.password_hash.clone()).await?;
        if !password_ok || user.role != role {
            warn!(user_id = %user.id, "rejected login attempt");
            return Err(invalid_credentials());
        }
        if !user.is_active() {
            return Err(suspended());
        }
        if !user.email_verified {
            return Err(ServiceError::forbidden(
                codes::EMAIL_NOT_VERIFIED,
                "verify your email address before logging in",
            ));
        }

        if user.mfa_enabled {
            let (challenge_token, expires_at) = self.keys.issue(
                user.id,
                user.role,
                TokenType::MfaChallenge,
                self.clock.now(),
                Duration::seconds(self.settings.mfa_challenge_ttl_secs),
            )?;
            info!(user_id = %user.id, "password accepted, awaiting MFA code");
            return Ok(LoginOutcome::MfaRequired(MfaChallenge {
                challenge_token,
                expires_at,
            }));
        }

        let session = self.start_session(&user).await?;
        info!(user_id = %user.id, role = %user.role, "login succeeded");
        Ok(LoginOutcome::Authenticated(session))
    }

    /// Second login step for MFA-enabled accounts.
    pub async fn verify_mfa(&self, role: Role, challenge: &str, code: &str) -> ServiceResult<Session> {
        let claims = self
            .keys
            .verify(challenge, TokenType::MfaChallenge, self.clock.now())?;
        if claims.role != role {
            return Err(invalid_credentials());
        }
        let user = self
            .repo
            .find_user_by_id(claims.user_id()?)
            .await?
            .ok_or_else(invalid_credentials)?;
        if !user.is_active() {
            return Err(suspended());
        }
        let secret = match (&user.mfa_secret, user.mfa_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => return Err(invalid_credentials()),
        };
        let recorded = match self.accept_totp(&secret, user.mfa_last_step, code)? {
            Some(step) => {
                self.repo
                    .update_user(user.id, UserUpdate::MfaStepUsed(step))
                    .await?
            }
            None => None,
        };
        // A replayed code fails here too, including one raced in by another request.
        let Some(user) = recorded else {
            warn!(user_id = %user.id, "rejected MFA code");
            return Err(ServiceError::unauthorized(
                codes::INVALID_MFA_CODE,
                "invalid authentication code",
            ));
        };

        let session = self.start_session(&user).await?;
        info!(user_id = %user.id, "MFA login succeeded");
        Ok(session)
    }

    async fn start_session(&self, user: &User) -> ServiceResult<Session> {
        let now = self.clock.now();
        let access_ttl = Duration::seconds(self.settings.access_token_ttl_secs);
        let (access_token, access_token_expires_at) =
            self.keys
                .issue(user.id, user.role, TokenType::Access, now, access_ttl)?;

        let refresh_token = generate_token();
        let refresh_token_expires_at = now + Duration::seconds(self.settings.refresh_token_ttl_secs);
        self.repo
            .insert_refresh_token(NewRefreshToken {
                user_id: user.id,
                token_hash: token_digest(&refresh_token),
                expires_at: refresh_token_expires_at,
            })
            .await?;

        Ok(Session {
            access_token,
            token_type: "Bearer",
            expires_in: self.settings.access_token_ttl_secs,
            access_token_expires_at,
            refresh_token,
            refresh_token_expires_at,
            user: UserProfile::from(user),
        })
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    pub async fn refresh(&self, raw_token: &str) -> ServiceResult<Session> {
        let now = self.clock.now();
        let digest = token_digest(raw_token);
        let invalid = || ServiceError::unauthorized(codes::INVALID_REFRESH_TOKEN, "invalid refresh token");

        let record = self
            .repo
            .find_refresh_token(&digest)
            .await?
            .ok_or_else(invalid)?;
        if record.is_expired_at(now) {
            return Err(ServiceError::unauthorized(
                codes::REFRESH_TOKEN_EXPIRED,
                "refresh token expired",
            ));
        }

        let user = self
            .repo
            .find_user_by_id(record.user_id)
            .await?
            .ok_or_else(invalid)?;
        if !user.is_active() {
            return Err(suspended());
        }
        if record.is_revoked() {
            return Err(self.reuse_detected(user.id).await);
        }

        let access_ttl = Duration::seconds(self.settings.access_token_ttl_secs);
        let refresh_token = generate_token();
        let refresh_token_expires_at = now + Duration::seconds(self.settings.refresh_token_ttl_secs);
        let replacement = NewRefreshToken {
            user_id: user.id,
            token_hash: token_digest(&refresh_token),
            expires_at: refresh_token_expires_at,
        };

        match self.repo.rotate_refresh_token(&digest, replacement, now).await? {
            RotationOutcome::Rotated { user_id } => {
                let (access_token, access_token_expires_at) =
                    self.keys
                        .issue(user_id, user.role, TokenType::Access, now, access_ttl)?;
                debug!(user_id = %user_id, "refresh token rotated");
                Ok(Session {
                    access_token,
                    token_type: "Bearer",
                    expires_in: self.settings.access_token_ttl_secs,
                    access_token_expires_at,
                    refresh_token,
                    refresh_token_expires_at,
                    user: UserProfile::from(&user),
                })
            }
            // Lost a race with another rotation of the same token.
            RotationOutcome::Reused { user_id } => Err(self.reuse_detected(user_id).await),
            RotationOutcome::Expired { .. } => Err(ServiceError::unauthorized(
                codes::REFRESH_TOKEN_EXPIRED,
                "refresh token expired",
            )),
            RotationOutcome::NotFound => Err(invalid()),
        }
    }

    async fn reuse_detected(&self, user_id: UserId) -> ServiceError {
        match self
            .repo
            .revoke_all_refresh_tokens(user_id, self.clock.now())
            .await
        {
            Ok(revoked) => {
                warn!(user_id = %user_id, revoked, "refresh token reuse detected, sessions revoked")
            }
            Err(e) => return e.into(),
        }
        ServiceError::unauthorized(codes::REFRESH_TOKEN_REUSED, "refresh token already used")
    }

    /// Revoke one refresh token. Unknown or already revoked tokens are ignored.
    pub async fn logout(&self, raw_token: &str) -> ServiceResult<()> {
        let revoked = self
            .repo
            .revoke_refresh_token(&token_digest(raw_token), self.clock.now())
            .await?;
        debug!(revoked, "logout");
        Ok(())
    }

    pub async fn logout_all(&self, user_id: UserId) -> ServiceResult<usize> {
        let revoked = self
            .repo
            .revoke_all_refresh_tokens(user_id, self.clock.now())
            .await?;
        info!(user_id = %user_id, revoked, "all sessions revoked");
        Ok(revoked)
    }

    /// Resolve a bearer access token to its (active) account.
    pub async fn authenticate(&self, access_token: &str) -> ServiceResult<User> {
        let claims = self
            .keys
            .verify(access_token, TokenType::Access, self.clock.now())?;
        let user = self
            .repo
            .find_user_by_id(claims.user_id()?)
            .await?
            .ok_or_else(|| ServiceError::unauthorized(codes::INVALID_TOKEN, "invalid token"))?;
        if !user.is_active() {
            return Err(suspended());
        }
        Ok(user)
    }

    // =========================================================================
    // Email verification and password recovery
    // =========================================================================

    async fn issue_one_time(&self, user: &User, purpose: TokenPurpose) -> ServiceResult<String> {
        let ttl_secs = match purpose {
            TokenPurpose::EmailVerification => self.settings.email_verification_ttl_secs,
            TokenPurpose::PasswordReset => self.settings.password_reset_ttl_secs,
        };
        let now = self.clock.now();
        self.repo
            .invalidate_one_time_tokens(user.id, purpose, now)
            .await?;
        let raw = generate_token();
        self.repo
            .insert_one_time_token(NewOneTimeToken {
                user_id: user.id,
                purpose,
                token_hash: token_digest(&raw),
                expires_at: now + Duration::seconds(ttl_secs),
            })
            .await?;
        Ok(raw)
    }

    async fn send_verification(&self, user: &User) -> ServiceResult<()> {
        let token = self.issue_one_time(user, TokenPurpose::EmailVerification).await?;
        if let Err(e) = self.notifier.send_verification(user, &token).await {
            warn!(user_id = %user.id, error = %e, "could not send verification email");
        }
        Ok(())
    }

    pub async fn verify_email(&self, raw_token: &str) -> ServiceResult<UserProfile> {
        let record = self
            .repo
            .consume_one_time_token(
                &token_digest(raw_token),
                TokenPurpose::EmailVerification,
                self.clock.now(),
            )
            .await?
            .ok_or_else(|| {
                ServiceError::validation_code(
                    codes::INVALID_VERIFICATION_TOKEN,
                    "verification link is invalid or has expired",
                )
            })?;

        let user = self
            .repo
            .update_user(record.user_id, UserUpdate::EmailVerified)
            .await?
            .ok_or_else(|| ServiceError::not_found(codes::USER_NOT_FOUND, "user not found"))?;
        info!(user_id = %user.id, "email verified");
        Ok(UserProfile::from(&user))
    }

    /// Always succeeds from the caller's point of view.
    pub async fn resend_verification(&self, email: &str) -> ServiceResult<()> {
        let Ok(email) = normalize_email(email) else {
            return Ok(());
        };
        if let Some(user) = self.repo.find_user_by_email(&email).await? {
            if !user.email_verified {
                self.send_verification(&user).await?;
            }
        }
        Ok(())
    }

    /// Always succeeds so callers cannot learn which emails exist.
    pub async fn forgot_password(&self, email: &str) -> ServiceResult<()> {
        let Ok(email) = normalize_email(email) else {
            return Ok(());
        };
        let Some(user) = self.repo.find_user_by_email(&email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };
        let token = self.issue_one_time(&user, TokenPurpose::PasswordReset).await?;
        if let Err(e) = self.notifier.send_password_reset(&user, &token).await {
            warn!(user_id = %user.id, error = %e, "could not send password reset email");
        }
        info!(user_id = %user.id, "password reset issued");
        Ok(())
    }

    pub async fn reset_password(&self, raw_token: &str, new_password: &str) -> ServiceResult<()> {
        check_password_policy(new_password)
            .map_err(|msg| ServiceError::validation_code(codes::WEAK_PASSWORD, msg))?;

        let now = self.clock.now();
        let record = self
            .repo
            .consume_one_time_token(&token_digest(raw_token), TokenPurpose::PasswordReset, now)
            .await?
            .ok_or_else(|| {
                ServiceError::validation_code(
                    codes::INVALID_RESET_TOKEN,
                    "reset link is invalid or has expired",
                )
            })?;

        let password_hash = hash_blocking(new_password.to_string()).await?;
        let user = self
            .repo
            .update_user(record.user_id, UserUpdate::PasswordHash(password_hash))
            .await?
            .ok_or_else(|| ServiceError::not_found(codes::USER_NOT_FOUND, "user not found"))?;
        self.repo
            .invalidate_one_time_tokens(user.id, TokenPurpose::PasswordReset, now)
            .await?;
        let revoked = self.repo.revoke_all_refresh_tokens(user.id, now).await?;
        info!(user_id = %user.id, revoked, "password reset");
        Ok(())
    }

    pub async fn change_password(
        &self,
        user_id: UserId,
        current_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        let user = self.load_user(user_id).await?;
        if !verify_blocking(current_password.to_string(), user.password_hash.clone()).await? {
            return Err(ServiceError::unauthorized(
                codes::INVALID_CREDENTIALS,
                "current password is incorrect",
            ));
        }
        check_password_policy(new_password)
            .map_err(|msg| ServiceError::validation_code(codes::WEAK_PASSWORD, msg))?;

        let password_hash = hash_blocking(new_password.to_string()).await?;
        self.repo
            .update_user(user.id, UserUpdate::PasswordHash(password_hash))
            .await?;
        let revoked = self
            .repo
            .revoke_all_refresh_tokens(user.id, self.clock.now())
            .await?;
        info!(user_id = %user.id, revoked, "password changed");
        Ok(())
    }

    // =========================================================================
    // MFA (admin accounts)
    // =========================================================================

    async fn load_user(&self, user_id: UserId) -> ServiceResult<User> {
        self.repo
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(codes::USER_NOT_FOUND, "user not found"))
    }

    async fn load_mfa_user(&self, user_id: UserId) -> ServiceResult<User> {
        let user = self.load_user(user_id).await?;
        if user.role != Role::Admin {
            return Err(ServiceError::forbidden(
                codes::MFA_NOT_ALLOWED,
                "MFA is only available to admin accounts",
            ));
        }
        Ok(user)
    }

    /// Step of a valid code that is later than the last accepted one.
    fn accept_totp(
        &self,
        secret: &str,
        last_step: Option<i64>,
        code: &str,
    ) -> ServiceResult<Option<i64>> {
        let step = totp::verify(secret, code, self.clock.now())
            .map_err(|e| ServiceError::internal(format!("stored MFA secret unusable: {e}")))?;
        Ok(step.filter(|step| last_step.map_or(true, |last| *step > last)))
    }

    /// Generate and store a new secret. MFA stays off until a code is confirmed.
    pub async fn mfa_setup(&self, user_id: UserId) -> ServiceResult<MfaSetup> {
        let user = self.load_mfa_user(user_id).await?;
        if user.mfa_enabled {
            return Err(mfa_already_enabled());
        }
        let secret = totp::generate_secret();
        let provisioning_uri = totp::provisioning_uri(&secret, &user.email, &self.settings.issuer);
        self.repo
            .update_user(user.id, UserUpdate::MfaSecret(secret.clone()))
            .await?
            .ok_or_else(mfa_already_enabled)?;
        debug!(user_id = %user.id, "MFA secret generated");
        Ok(MfaSetup {
            secret,
            provisioning_uri,
        })
    }

    pub async fn mfa_enable(&self, user_id: UserId, code: &str) -> ServiceResult<()> {
        let user = self.load_mfa_user(user_id).await?;
        if user.mfa_enabled {
            return Err(mfa_already_enabled());
        }
        let secret = user.mfa_secret.clone().ok_or_else(|| {
            ServiceError::conflict(codes::MFA_NOT_SET_UP, "run MFA setup first")
        })?;
        let step = self
            .accept_totp(&secret, user.mfa_last_step, code)?
            .ok_or_else(|| {
                ServiceError::validation_code(codes::INVALID_MFA_CODE, "invalid authentication code")
            })?;
        if self
            .repo
            .update_user(user.id, UserUpdate::EnableMfa { secret, step })
            .await?
            .is_none()
        {
            // Enabled or set up again since we read the account.
            let current = self.load_user(user.id).await?;
            return Err(if current.mfa_enabled {
                mfa_already_enabled()
            } else {
                ServiceError::validation_code(codes::INVALID_MFA_CODE, "invalid authentication code")
            });
        }
        info!(user_id = %user.id, "MFA enabled");
        Ok(())
    }

    pub async fn mfa_disable(&self, user_id: UserId, code: &str) -> ServiceResult<()> {
        let user = self.load_mfa_user(user_id).await?;
        let not_enabled = || ServiceError::conflict(codes::MFA_NOT_ENABLED, "MFA is not enabled");
        let secret = match (&user.mfa_secret, user.mfa_enabled) {
            (Some(secret), true) => secret.clone(),
            _ => return Err(not_enabled()),
        };
        if self
            .accept_totp(&secret, user.mfa_last_step, code)?
            .is_none()
        {
            return Err(ServiceError::validation_code(
                codes::INVALID_MFA_CODE,
                "invalid authentication code",
            ));
        }
        self.repo
            .update_user(user.id, UserUpdate::DisableMfa)
            .await?
            .ok_or_else(not_enabled)?;
        info!(user_id = %user.id, "MFA disabled");
        Ok(())
    }

    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Create the configured admin account if it does not exist yet.
    /// Returns whether an account was created.
    pub async fn bootstrap_admin(&self) -> ServiceResult<bool> {
        let (Some(email), Some(password)) = (
            self.settings.admin_email.as_deref(),
            self.settings.admin_password.as_deref(),
        ) else {
            return Ok(false);
        };
        let email = normalize_email(email)?;
        if let Some(existing) = self.repo.find_user_by_email(&email).await? {
            if existing.role != Role::Admin {
                warn!(user_id = %existing.id, "bootstrap admin email belongs to a non-admin account");
            }
            return Ok(false);
        }
        check_password_policy(password)
            .map_err(|msg| ServiceError::validation_code(codes::WEAK_PASSWORD, msg))?;

        let password_hash = hash_blocking(password.to_string()).await?;
        let admin = self
            .repo
            .create_user(NewUser {
                email,
                password_hash,
                name: "Administrator".to_string(),
                phone: None,
                role: Role::Admin,
                email_verified: true,
            })
            .await?;
        info!(user_id = %admin.id, "bootstrap admin created");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_lowercased_and_trimmed() {
        assert_eq!(
            normalize_email("  Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "alice", "@example.com", "alice@", "alice@example", "a@b@c.com", "a b@c.com", "a@.com", "a@c..com"] {
            assert!(normalize_email(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
