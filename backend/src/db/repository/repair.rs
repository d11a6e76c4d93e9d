//! Repair request and quote persistence.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{
    NewRepairRequest, QuoteId, QuoteStatus, QuoteTerms, RepairFilter, RepairQuote, RepairRequest,
    RepairRequestId, RepairStatus, UserId,
};

#[async_trait]
pub trait RepairRepository: Send + Sync {
    async fn create_repair_request(
        &self,
        buyer_id: UserId,
        request: NewRepairRequest,
    ) -> RepositoryResult<RepairRequest>;

    async fn get_repair_request(
        &self,
        id: RepairRequestId,
    ) -> RepositoryResult<Option<RepairRequest>>;

    /// List requests matching `filter`, newest first.
    async fn list_repair_requests(
        &self,
        filter: &RepairFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<RepairRequest>, u64)>;

    /// Compare-and-set the request status. Moving to `Cancelled` stores
    /// `reason` and marks any pending quote `rejected` in the same unit of
    /// work.
    ///
    /// # Returns
    /// * `Ok(None)` - The request is missing or no longer in `from`
    async fn transition_repair_request(
        &self,
        id: RepairRequestId,
        from: RepairStatus,
        to: RepairStatus,
        reason: Option<String>,
    ) -> RepositoryResult<Option<RepairRequest>>;

    /// Insert a quote and move the request from `Pending` to `Quoted`.
    ///
    /// # Returns
    /// * `Ok(None)` - The request is missing or not `Pending`
    async fn issue_quote(
        &self,
        request_id: RepairRequestId,
        repair_center_id: UserId,
        terms: QuoteTerms,
        total_cents: i64,
    ) -> RepositoryResult<Option<RepairQuote>>;

    async fn get_quote(&self, id: QuoteId) -> RepositoryResult<Option<RepairQuote>>;

    /// Quotes for a request, newest first.
    async fn list_quotes(&self, request_id: RepairRequestId)
        -> RepositoryResult<Vec<RepairQuote>>;

    /// Settle a pending quote and move its request in one unit of work.
    ///
    /// # Returns
    /// * `Ok(None)` - The quote is not `Pending`, or its request is not in `request_from`
    async fn resolve_quote(
        &self,
        quote_id: QuoteId,
        quote_status: QuoteStatus,
        request_from: RepairStatus,
        request_to: RepairStatus,
    ) -> RepositoryResult<Option<(RepairQuote, RepairRequest)>>;
}
