use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{AuditEntry, NewAuditEntry};

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record_audit(&self, entry: NewAuditEntry) -> RepositoryResult<AuditEntry>;

    /// Newest entries first.
    async fn list_audit(&self, offset: u64, limit: u64)
        -> RepositoryResult<(Vec<AuditEntry>, u64)>;
}
