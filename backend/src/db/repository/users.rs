//! Account persistence.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{AccountStatus, KycDetails, NewUser, User, UserFilter, UserId};

/// A change to a subset of an account's columns.
///
/// Each variant writes only the columns it names. Conditional variants apply
/// only while the account is in the stated state, so two updates to different
/// fields never overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserUpdate {
    /// `None` keeps a field; `Some(None)` clears the phone.
    Profile {
        name: Option<String>,
        phone: Option<Option<String>>,
    },
    Status(AccountStatus),
    EmailVerified,
    PasswordHash(String),
    /// Stores the details and moves verification to `pending`. Applies only
    /// while verification is `not_submitted` or `rejected`.
    SubmitKyc(KycDetails),
    /// Applies only while verification is `pending`.
    ReviewKyc {
        approved: bool,
        rejection_reason: Option<String>,
    },
    /// Replaces any unconfirmed secret. Applies only while MFA is off.
    MfaSecret(String),
    /// Turns MFA on and records the step of the confirming code. Applies only
    /// while MFA is off and `secret` is still the stored secret.
    EnableMfa { secret: String, step: i64 },
    /// Clears the secret. Applies only while MFA is on.
    DisableMfa,
    /// Records an accepted TOTP step. Applies only while MFA is on and `step`
    /// is later than the last accepted one.
    MfaStepUsed(i64),
}

/// Repository trait for user accounts.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Check that the backing store is reachable.
    async fn health_check(&self) -> RepositoryResult<bool>;

    /// Insert a new account.
    ///
    /// The email is stored as given; callers normalize it first.
    ///
    /// # Returns
    /// * `Ok(User)` - The stored account with its assigned ID
    /// * `Err(RepositoryError::Conflict)` - If the email is already registered
    async fn create_user(&self, user: NewUser) -> RepositoryResult<User>;

    async fn find_user_by_id(&self, id: UserId) -> RepositoryResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;

    /// Apply one field-scoped change and bump `updated_at`.
    ///
    /// # Returns
    /// * `Ok(Some(user))` - The stored record after the update
    /// * `Ok(None)` - The account is not in the state the update requires
    /// * `Err(RepositoryError::NotFound)` - If the account does not exist
    async fn update_user(&self, id: UserId, update: UserUpdate) -> RepositoryResult<Option<User>>;

    /// List accounts matching `filter`, oldest first.
    ///
    /// # Returns
    /// The requested window and the total number of matches.
    async fn list_users(
        &self,
        filter: &UserFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<User>, u64)>;
}
