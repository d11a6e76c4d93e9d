//! Repair center endpoints: quoting and working through assigned requests.

use axum::extract::State;

use super::{CreatedResult, HandlerResult};
use crate::http::dto::{created, ok, page_of, ReasonRequest, RepairListQuery, RepairStatusRequest};
use crate::http::extract::{ApiJson, ApiPath, ApiQuery, RepairCenterUser};
use crate::http::state::AppState;
use crate::models::{QuoteTerms, RepairQuote, RepairRequest, RepairRequestId};
use crate::services::Paginated;

/// GET /api/repair-center/repair-requests
pub async fn list_assigned(
    State(state): State<AppState>,
    center: RepairCenterUser,
    ApiQuery(query): ApiQuery<RepairListQuery>,
) -> HandlerResult<Paginated<RepairRequest>> {
    let requests = state
        .services
        .repair
        .list_assigned(center.id(), query.status, page_of(query.page, query.limit))
        .await?;
    Ok(ok("REPAIR_REQUESTS", "repair requests retrieved", requests))
}

/// POST /api/repair-center/repair-requests/{id}/accept
///
/// Takes the request on by issuing a quote.
pub async fn accept_request(
    State(state): State<AppState>,
    center: RepairCenterUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
    ApiJson(terms): ApiJson<QuoteTerms>,
) -> CreatedResult<RepairQuote> {
    let quote = state
        .services
        .repair
        .accept_request(center.id(), request_id, terms)
        .await?;
    Ok(created("QUOTE_ISSUED", "quote sent to the buyer", quote))
}

/// POST /api/repair-center/repair-requests/{id}/reject
pub async fn reject_request(
    State(state): State<AppState>,
    center: RepairCenterUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
    ApiJson(body): ApiJson<ReasonRequest>,
) -> HandlerResult<RepairRequest> {
    let request = state
        .services
        .repair
        .reject_request(center.id(), request_id, body.reason)
        .await?;
    Ok(ok("REPAIR_REQUEST_REJECTED", "repair request rejected", request))
}

/// PATCH /api/repair-center/repair-requests/{id}/status
pub async fn update_status(
    State(state): State<AppState>,
    center: RepairCenterUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
    ApiJson(body): ApiJson<RepairStatusRequest>,
) -> HandlerResult<RepairRequest> {
    let request = state
        .services
        .repair
        .update_status(center.id(), request_id, body.status)
        .await?;
    Ok(ok("REPAIR_STATUS_UPDATED", "repair status updated", request))
}

/// POST /api/repair-center/repair-requests/{id}/complete
pub async fn complete(
    State(state): State<AppState>,
    center: RepairCenterUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
) -> HandlerResult<RepairRequest> {
    let request = state.services.repair.complete(center.id(), request_id).await?;
    Ok(ok("REPAIR_COMPLETED", "repair completed", request))
}
