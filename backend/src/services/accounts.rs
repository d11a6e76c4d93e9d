//! Profiles, business verification and admin moderation of accounts.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use super::clock::Clock;
use super::error::{codes, ServiceError, ServiceResult};
use super::pagination::{Page, Paginated};
use crate::db::repository::{
    FullRepository, RepositoryError, TokenRepository, UserRepository, UserUpdate,
};
use crate::models::{AccountStatus, KycDetails, KycStatus, User, UserFilter, UserId, UserProfile};

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KycSubmission {
    pub business_name: String,
    pub registration_number: String,
    pub document_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KycDecision {
    pub approve: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

fn user_not_found() -> ServiceError {
    ServiceError::not_found(codes::USER_NOT_FOUND, "user not found")
}

/// Map a missing account to the service's not-found error.
fn user_error(err: RepositoryError) -> ServiceError {
    if err.is_not_found() {
        user_not_found()
    } else {
        err.into()
    }
}

#[derive(Clone)]
pub struct AccountService {
    repo: Arc<dyn FullRepository>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(repo: Arc<dyn FullRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    async fn load(&self, user_id: UserId) -> ServiceResult<User> {
        self.repo
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(user_not_found)
    }

    pub async fn get_profile(&self, user_id: UserId) -> ServiceResult<UserProfile> {
        Ok(UserProfile::from(&self.load(user_id).await?))
    }

    /// Blank name is rejected; a blank phone clears it.
    pub async fn update_profile(
        &self,
        user_id: UserId,
        update: ProfileUpdate,
    ) -> ServiceResult<UserProfile> {
        let name = match update.name {
            Some(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ServiceError::validation("name cannot be empty"));
                }
                Some(name.to_string())
            }
            None => None,
        };
        let phone = update.phone.map(|phone| {
            let phone = phone.trim();
            (!phone.is_empty()).then(|| phone.to_string())
        });
        let user = self
            .repo
            .update_user(user_id, UserUpdate::Profile { name, phone })
            .await
            .map_err(user_error)?
            .ok_or_else(user_not_found)?;
        Ok(UserProfile::from(&user))
    }

    pub async fn submit_kyc(
        &self,
        user_id: UserId,
        submission: KycSubmission,
    ) -> ServiceResult<UserProfile> {
        let user = self.load(user_id).await?;
        if !user.role.requires_kyc() {
            return Err(ServiceError::forbidden(
                codes::FORBIDDEN,
                "business verification is only for sellers and repair centers",
            ));
        }
        let already_submitted = |status: KycStatus| {
            ServiceError::conflict(
                codes::KYC_ALREADY_SUBMITTED,
                format!("verification is already {status}"),
            )
        };
        if !matches!(user.kyc_status, KycStatus::NotSubmitted | KycStatus::Rejected) {
            return Err(already_submitted(user.kyc_status));
        }

        let business_name = submission.business_name.trim();
        let registration_number = submission.registration_number.trim();
        let document_url = submission.document_url.trim();
        if business_name.is_empty() || registration_number.is_empty() || document_url.is_empty() {
            return Err(ServiceError::validation(
                "business name, registration number and document URL are required",
            ));
        }

        let details = KycDetails {
            business_name: business_name.to_string(),
            registration_number: registration_number.to_string(),
            document_url: document_url.to_string(),
            rejection_reason: None,
        };
        let user = self
            .repo
            .update_user(user.id, UserUpdate::SubmitKyc(details))
            .await?
            // A concurrent submission got there first.
            .ok_or_else(|| already_submitted(KycStatus::Pending))?;
        info!(user_id = %user.id, "KYC submitted");
        Ok(UserProfile::from(&user))
    }

    // =========================================================================
    // Admin moderation
    // =========================================================================

    pub async fn list_users(
        &self,
        filter: &UserFilter,
        page: Page,
    ) -> ServiceResult<Paginated<UserProfile>> {
        let (users, total) = self
            .repo
            .list_users(filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(users.iter().map(UserProfile::from).collect(), total))
    }

    /// Suspending an account also ends all of its sessions.
    pub async fn set_user_status(
        &self,
        admin_id: UserId,
        target: UserId,
        status: AccountStatus,
    ) -> ServiceResult<UserProfile> {
        if admin_id == target {
            return Err(ServiceError::conflict(
                codes::CANNOT_MODIFY_SELF,
                "admins cannot change their own status",
            ));
        }
        let user = self.load(target).await?;
        if user.status == status {
            return Ok(UserProfile::from(&user));
        }
        let user = self
            .repo
            .update_user(user.id, UserUpdate::Status(status))
            .await
            .map_err(user_error)?
            .ok_or_else(user_not_found)?;

        if status == AccountStatus::Suspended {
            let revoked = self
                .repo
                .revoke_all_refresh_tokens(user.id, self.clock.now())
                .await?;
            info!(admin_id = %admin_id, user_id = %user.id, revoked, "account suspended");
        } else {
            info!(admin_id = %admin_id, user_id = %user.id, "account reactivated");
        }
        Ok(UserProfile::from(&user))
    }

    pub async fn review_kyc(
        &self,
        admin_id: UserId,
        target: UserId,
        decision: KycDecision,
    ) -> ServiceResult<UserProfile> {
        let user = self.load(target).await?;
        let not_pending = |status: KycStatus| {
            ServiceError::conflict(
                codes::KYC_NOT_PENDING,
                format!("verification is {status}, not pending"),
            )
        };
        if user.kyc_status != KycStatus::Pending {
            return Err(not_pending(user.kyc_status));
        }

        let rejection_reason = if decision.approve {
            None
        } else {
            let reason = decision
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .ok_or_else(|| ServiceError::validation("a rejection reason is required"))?;
            Some(reason.to_string())
        };

        let user = self
            .repo
            .update_user(
                user.id,
                UserUpdate::ReviewKyc {
                    approved: decision.approve,
                    rejection_reason,
                },
            )
            .await?
            // Reviewed by someone else in the meantime.
            .ok_or_else(|| {
                ServiceError::conflict(codes::KYC_NOT_PENDING, "verification is no longer pending")
            })?;
        info!(
            admin_id = %admin_id,
            user_id = %user.id,
            kyc_status = %user.kyc_status,
            "KYC reviewed"
        );
        Ok(UserProfile::from(&user))
    }
}
