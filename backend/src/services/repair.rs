//! Repair requests between buyers and repair centers.
//!
//! Every status change is checked against [`RepairStatus::next_statuses`]
//! here and then applied with a compare-and-set in the repository, so two
//! racing updates cannot both succeed.

use std::sync::Arc;

use tracing::{info, warn};

use super::clock::Clock;
use super::error::{codes, ServiceError, ServiceResult};
use super::pagination::{Page, Paginated};
use crate::db::repository::{FullRepository, RepairRepository, UserRepository};
use crate::models::{
    NewRepairRequest, QuoteId, QuoteStatus, QuoteTerms, RepairFilter, RepairQuote, RepairRequest,
    RepairRequestId, RepairStatus, Role, UserId,
};

const MAX_TEXT_LEN: usize = 2000;

fn request_not_found() -> ServiceError {
    ServiceError::not_found(codes::REPAIR_REQUEST_NOT_FOUND, "repair request not found")
}

fn quote_not_found() -> ServiceError {
    ServiceError::not_found(codes::QUOTE_NOT_FOUND, "quote not found")
}

fn required_text(field: &str, value: &str) -> ServiceResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    if value.chars().count() > MAX_TEXT_LEN {
        return Err(ServiceError::validation(format!(
            "{field} must be at most {MAX_TEXT_LEN} characters"
        )));
    }
    Ok(value.to_string())
}

/// Check quote terms and compute the total.
pub fn validate_quote_terms(
    terms: &QuoteTerms,
    now: chrono::DateTime<chrono::Utc>,
) -> ServiceResult<i64> {
    if terms.labor_cents < 0 || terms.parts_cents < 0 || terms.tax_cents < 0 {
        return Err(ServiceError::validation("quote amounts must not be negative"));
    }
    let total = terms
        .total_cents()
        .ok_or_else(|| ServiceError::validation("quote total is too large"))?;
    if total <= 0 {
        return Err(ServiceError::validation("quote total must be greater than zero"));
    }
    if terms.estimated_days < 1 {
        return Err(ServiceError::validation("estimated_days must be at least 1"));
    }
    if terms.valid_until <= now {
        return Err(ServiceError::validation("valid_until must be in the future"));
    }
    Ok(total)
}

#[derive(Clone)]
pub struct RepairService {
    repo: Arc<dyn FullRepository>,
    clock: Arc<dyn Clock>,
}

impl RepairService {
    pub fn new(repo: Arc<dyn FullRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    async fn load_visible(&self, user: UserId, id: RepairRequestId) -> ServiceResult<RepairRequest> {
        self.repo
            .get_repair_request(id)
            .await?
            .filter(|r| r.is_visible_to(user))
            .ok_or_else(request_not_found)
    }

    async fn load_for_center(&self, center: UserId, id: RepairRequestId) -> ServiceResult<RepairRequest> {
        self.repo
            .get_repair_request(id)
            .await?
            .filter(|r| r.repair_center_id == center)
            .ok_or_else(request_not_found)
    }

    async fn load_for_buyer(&self, buyer: UserId, id: RepairRequestId) -> ServiceResult<RepairRequest> {
        self.repo
            .get_repair_request(id)
            .await?
            .filter(|r| r.buyer_id == buyer)
            .ok_or_else(request_not_found)
    }

    /// Validate against the table, then compare-and-set.
    async fn transition(
        &self,
        request: &RepairRequest,
        next: RepairStatus,
        reason: Option<String>,
    ) -> ServiceResult<RepairRequest> {
        if !request.status.can_transition_to(next) {
            return Err(ServiceError::invalid_transition(request.status, next));
        }
        self.repo
            .transition_repair_request(request.id, request.status, next, reason)
            .await?
            .ok_or_else(|| ServiceError::invalid_transition(request.status, next))
    }

    // =========================================================================
    // Buyer operations
    // =========================================================================

    pub async fn create_request(
        &self,
        buyer_id: UserId,
        input: NewRepairRequest,
    ) -> ServiceResult<RepairRequest> {
        let device_type = required_text("device_type", &input.device_type)?;
        let issue_description = required_text("issue_description", &input.issue_description)?;

        let center = self
            .repo
            .find_user_by_id(input.repair_center_id)
            .await?
            .filter(|c| c.role == Role::RepairCenter && c.is_active() && c.is_kyc_approved())
            .ok_or_else(|| {
                ServiceError::not_found(codes::REPAIR_CENTER_NOT_FOUND, "repair center not found")
            })?;

        let request = self
            .repo
            .create_repair_request(
                buyer_id,
                NewRepairRequest {
                    repair_center_id: center.id,
                    device_type,
                    brand: input.brand.trim().to_string(),
                    model: input.model.trim().to_string(),
                    issue_description,
                },
            )
            .await?;
        info!(
            buyer_id = %buyer_id,
            request_id = %request.id,
            repair_center_id = %center.id,
            "repair request created"
        );
        Ok(request)
    }

    pub async fn list_my_requests(
        &self,
        buyer_id: UserId,
        status: Option<RepairStatus>,
        page: Page,
    ) -> ServiceResult<Paginated<RepairRequest>> {
        let filter = RepairFilter {
            buyer_id: Some(buyer_id),
            status,
            ..Default::default()
        };
        let (items, total) = self
            .repo
            .list_repair_requests(&filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(items, total))
    }

    pub async fn get_request(&self, user: UserId, id: RepairRequestId) -> ServiceResult<RepairRequest> {
        self.load_visible(user, id).await
    }

    pub async fn list_quotes(&self, user: UserId, id: RepairRequestId) -> ServiceResult<Vec<RepairQuote>> {
        let request = self.load_visible(user, id).await?;
        Ok(self.repo.list_quotes(request.id).await?)
    }

    /// Load a quote the buyer owns, together with its request.
    async fn load_buyer_quote(
        &self,
        buyer_id: UserId,
        quote_id: QuoteId,
        target: RepairStatus,
    ) -> ServiceResult<(RepairQuote, RepairRequest)> {
        let quote = self
            .repo
            .get_quote(quote_id)
            .await?
            .ok_or_else(quote_not_found)?;
        let request = self
            .repo
            .get_repair_request(quote.request_id)
            .await?
            .filter(|r| r.buyer_id == buyer_id)
            .ok_or_else(quote_not_found)?;
        if quote.status != QuoteStatus::Pending {
            return Err(ServiceError::conflict(
                codes::QUOTE_NOT_PENDING,
                format!("quote is already {}", quote.status),
            ));
        }
        if request.status != RepairStatus::Quoted {
            return Err(ServiceError::invalid_transition(request.status, target));
        }
        Ok((quote, request))
    }

    /// Accept a pending quote. An expired quote is marked expired and the
    /// request goes back to pending for a fresh quote.
    pub async fn accept_quote(
        &self,
        buyer_id: UserId,
        quote_id: QuoteId,
    ) -> ServiceResult<(RepairQuote, RepairRequest)> {
        let (quote, _) = self
            .load_buyer_quote(buyer_id, quote_id, RepairStatus::Accepted)
            .await?;

        if quote.is_expired_at(self.clock.now()) {
            let resolved = self
                .repo
                .resolve_quote(quote.id, QuoteStatus::Expired, RepairStatus::Quoted, RepairStatus::Pending)
                .await?;
            if resolved.is_some() {
                info!(quote_id = %quote.id, request_id = %quote.request_id, "quote expired");
            }
            return Err(ServiceError::conflict(codes::QUOTE_EXPIRED, "quote has expired"));
        }

        let resolved = self
            .repo
            .resolve_quote(quote.id, QuoteStatus::Accepted, RepairStatus::Quoted, RepairStatus::Accepted)
            .await?
            .ok_or_else(|| ServiceError::invalid_transition(RepairStatus::Quoted, RepairStatus::Accepted))?;
        info!(
            buyer_id = %buyer_id,
            quote_id = %quote.id,
            request_id = %quote.request_id,
            "quote accepted"
        );
        Ok(resolved)
    }

    /// Reject a pending quote; the request returns to pending.
    pub async fn reject_quote(
        &self,
        buyer_id: UserId,
        quote_id: QuoteId,
    ) -> ServiceResult<(RepairQuote, RepairRequest)> {
        let (quote, _) = self
            .load_buyer_quote(buyer_id, quote_id, RepairStatus::Pending)
            .await?;
        let resolved = self
            .repo
            .resolve_quote(quote.id, QuoteStatus::Rejected, RepairStatus::Quoted, RepairStatus::Pending)
            .await?
            .ok_or_else(|| ServiceError::invalid_transition(RepairStatus::Quoted, RepairStatus::Pending))?;
        info!(buyer_id = %buyer_id, quote_id = %quote.id, "quote rejected");
        Ok(resolved)
    }

    pub async fn cancel_request(
        &self,
        buyer_id: UserId,
        id: RepairRequestId,
        reason: Option<String>,
    ) -> ServiceResult<RepairRequest> {
        let request = self.load_for_buyer(buyer_id, id).await?;
        if !request.status.buyer_may_cancel() {
            return Err(ServiceError::invalid_transition(request.status, RepairStatus::Cancelled));
        }
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "cancelled by buyer".to_string());
        let request = self
            .transition(&request, RepairStatus::Cancelled, Some(reason))
            .await?;
        info!(buyer_id = %buyer_id, request_id = %request.id, "repair request cancelled by buyer");
        Ok(request)
    }

    // =========================================================================
    // Repair center operations
    // =========================================================================

    pub async fn list_assigned(
        &self,
        center_id: UserId,
        status: Option<RepairStatus>,
        page: Page,
    ) -> ServiceResult<Paginated<RepairRequest>> {
        let filter = RepairFilter {
            repair_center_id: Some(center_id),
            status,
            ..Default::default()
        };
        let (items, total) = self
            .repo
            .list_repair_requests(&filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(items, total))
    }

    /// Take on a pending request by quoting it (pending -> quoted).
    pub async fn accept_request(
        &self,
        center_id: UserId,
        id: RepairRequestId,
        terms: QuoteTerms,
    ) -> ServiceResult<RepairQuote> {
        let request = self.load_for_center(center_id, id).await?;
        if !request.status.can_transition_to(RepairStatus::Quoted) {
            return Err(ServiceError::invalid_transition(request.status, RepairStatus::Quoted));
        }
        let total = validate_quote_terms(&terms, self.clock.now())?;
        let terms = QuoteTerms {
            notes: terms
                .notes
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
            ..terms
        };

        let quote = self
            .repo
            .issue_quote(request.id, center_id, terms, total)
            .await?
            .ok_or_else(|| ServiceError::invalid_transition(request.status, RepairStatus::Quoted))?;
        info!(
            repair_center_id = %center_id,
            request_id = %request.id,
            quote_id = %quote.id,
            total_cents = quote.total_cents,
            "quote issued"
        );
        Ok(quote)
    }

    /// Decline or abandon a request. A reason is required.
    pub async fn reject_request(
        &self,
        center_id: UserId,
        id: RepairRequestId,
        reason: Option<String>,
    ) -> ServiceResult<RepairRequest> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ServiceError::validation("a reason is required"))?;
        let request = self.load_for_center(center_id, id).await?;
        let request = self
            .transition(&request, RepairStatus::Cancelled, Some(reason))
            .await?;
        info!(repair_center_id = %center_id, request_id = %request.id, "repair request rejected");
        Ok(request)
    }

    /// Move a request through the work phases.
    pub async fn update_status(
        &self,
        center_id: UserId,
        id: RepairRequestId,
        next: RepairStatus,
    ) -> ServiceResult<RepairRequest> {
        if !next.is_work_phase() {
            return Err(ServiceError::validation(format!(
                "status {next} cannot be set directly; use the dedicated operation"
            )));
        }
        let request = self.load_for_center(center_id, id).await?;
        let updated = self.transition(&request, next, None).await.map_err(|e| {
            warn!(request_id = %request.id, from = %request.status, to = %next, "rejected status change");
            e
        })?;
        info!(request_id = %updated.id, status = %updated.status, "repair status updated");
        Ok(updated)
    }

    pub async fn complete(&self, center_id: UserId, id: RepairRequestId) -> ServiceResult<RepairRequest> {
        let request = self.load_for_center(center_id, id).await?;
        let request = self
            .transition(&request, RepairStatus::Completed, None)
            .await?;
        info!(repair_center_id = %center_id, request_id = %request.id, "repair completed");
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn terms(labor: i64, parts: i64, tax: i64) -> QuoteTerms {
        QuoteTerms {
            labor_cents: labor,
            parts_cents: parts,
            tax_cents: tax,
            estimated_days: 3,
            notes: None,
            valid_until: Utc::now() + Duration::days(7),
        }
    }

    #[test]
    fn quote_total_is_sum_of_parts() {
        assert_eq!(validate_quote_terms(&terms(5000, 2500, 600), Utc::now()).unwrap(), 8100);
    }

    #[test]
    fn quote_terms_are_range_checked() {
        let now = Utc::now();
        assert!(validate_quote_terms(&terms(-1, 10, 0), now).is_err());
        assert!(validate_quote_terms(&terms(0, 0, 0), now).is_err());

        let mut stale = terms(100, 0, 0);
        stale.valid_until = now;
        assert!(validate_quote_terms(&stale, now).is_err());

        let mut zero_days = terms(100, 0, 0);
        zero_days.estimated_days = 0;
        assert!(validate_quote_terms(&zero_days, now).is_err());
    }
}
