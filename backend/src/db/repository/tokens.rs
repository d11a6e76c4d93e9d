//! Persistence for opaque credentials.
//!
//! All lookups are by SHA-256 digest; raw tokens never reach this layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::models::{
    NewOneTimeToken, NewRefreshToken, OneTimeTokenRecord, RefreshTokenRecord, RotationOutcome,
    TokenPurpose, UserId,
};

#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> RepositoryResult<RefreshTokenRecord>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> RepositoryResult<Option<RefreshTokenRecord>>;

    /// Atomically exchange a live refresh token for `replacement`.
    ///
    /// The old token is revoked and `replacement` inserted only when the old
    /// token exists, is unrevoked and is unexpired at `now`. Two concurrent
    /// rotations of the same token can never both succeed: the loser observes
    /// [`RotationOutcome::Reused`].
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RotationOutcome>;

    /// Revoke a single token. Returns `false` when it was unknown or already revoked.
    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Revoke every live refresh token of a user. Returns how many were revoked.
    async fn revoke_all_refresh_tokens(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize>;

    async fn insert_one_time_token(
        &self,
        token: NewOneTimeToken,
    ) -> RepositoryResult<OneTimeTokenRecord>;

    /// Mark a single-use token as used and return it.
    ///
    /// Returns `None` when no token with this digest and purpose exists, or
    /// it was already used, or it expired before `now`.
    async fn consume_one_time_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<OneTimeTokenRecord>>;

    /// Mark every unused token of `purpose` for this user as used.
    async fn invalidate_one_time_tokens(
        &self,
        user_id: UserId,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize>;
}
