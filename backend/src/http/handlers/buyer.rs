//! Buyer endpoints: browsing, checkout, orders and repair requests.

use axum::{body::Bytes, extract::State};

use super::{CreatedResult, HandlerResult};
use crate::http::dto::{
    created, ok, page_of, BrowseQuery, CheckoutResponse, OrderListQuery, QuoteDecisionResponse,
    ReasonRequest, RepairListQuery,
};
use crate::http::error::AppError;
use crate::http::extract::{ApiJson, ApiPath, ApiQuery, BuyerUser};
use crate::http::state::AppState;
use crate::models::{
    orders_total_cents, NewRepairRequest, Order, OrderId, Product, ProductId, QuoteId,
    RepairQuote, RepairRequest, RepairRequestId,
};
use crate::services::catalog::CheckoutRequest;
use crate::services::{Paginated, ServiceError};

// =============================================================================
// Catalog
// =============================================================================

/// GET /api/buyer/products
pub async fn browse_products(
    State(state): State<AppState>,
    _buyer: BuyerUser,
    ApiQuery(query): ApiQuery<BrowseQuery>,
) -> HandlerResult<Paginated<Product>> {
    let products = state
        .services
        .catalog
        .browse(query.category, page_of(query.page, query.limit))
        .await?;
    Ok(ok("PRODUCTS", "products retrieved", products))
}

/// GET /api/buyer/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    _buyer: BuyerUser,
    ApiPath(product_id): ApiPath<ProductId>,
) -> HandlerResult<Product> {
    let product = state.services.catalog.get_product(product_id).await?;
    Ok(ok("PRODUCT", "product retrieved", product))
}

// =============================================================================
// Orders
// =============================================================================

/// POST /api/buyer/orders
///
/// Reserves stock for every line or none; one order is created per seller.
pub async fn checkout(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiJson(body): ApiJson<CheckoutRequest>,
) -> CreatedResult<CheckoutResponse> {
    let orders = state
        .services
        .catalog
        .checkout(buyer.id(), &body.items)
        .await?;
    let total_cents = orders_total_cents(&orders)
        .ok_or_else(|| ServiceError::internal("checkout total does not fit in i64"))?;
    Ok(created(
        "ORDER_PLACED",
        "order placed",
        CheckoutResponse {
            orders,
            total_cents,
        },
    ))
}

/// GET /api/buyer/orders
pub async fn list_orders(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiQuery(query): ApiQuery<OrderListQuery>,
) -> HandlerResult<Paginated<Order>> {
    let orders = state
        .services
        .catalog
        .list_buyer_orders(buyer.id(), query.status, page_of(query.page, query.limit))
        .await?;
    Ok(ok("ORDERS", "orders retrieved", orders))
}

/// POST /api/buyer/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiPath(order_id): ApiPath<OrderId>,
) -> HandlerResult<Order> {
    let order = state.services.catalog.cancel_order(buyer.id(), order_id).await?;
    Ok(ok("ORDER_CANCELLED", "order cancelled", order))
}

// =============================================================================
// Repair requests
// =============================================================================

/// POST /api/buyer/repair-requests
pub async fn create_repair_request(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiJson(input): ApiJson<NewRepairRequest>,
) -> CreatedResult<RepairRequest> {
    let request = state.services.repair.create_request(buyer.id(), input).await?;
    Ok(created("REPAIR_REQUEST_CREATED", "repair request submitted", request))
}

/// GET /api/buyer/repair-requests
pub async fn list_repair_requests(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiQuery(query): ApiQuery<RepairListQuery>,
) -> HandlerResult<Paginated<RepairRequest>> {
    let requests = state
        .services
        .repair
        .list_my_requests(buyer.id(), query.status, page_of(query.page, query.limit))
        .await?;
    Ok(ok("REPAIR_REQUESTS", "repair requests retrieved", requests))
}

/// GET /api/buyer/repair-requests/{id}
pub async fn get_repair_request(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
) -> HandlerResult<RepairRequest> {
    let request = state.services.repair.get_request(buyer.id(), request_id).await?;
    Ok(ok("REPAIR_REQUEST", "repair request retrieved", request))
}

/// GET /api/buyer/repair-requests/{id}/quotes
pub async fn list_quotes(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
) -> HandlerResult<Vec<RepairQuote>> {
    let quotes = state.services.repair.list_quotes(buyer.id(), request_id).await?;
    Ok(ok("QUOTES", "quotes retrieved", quotes))
}

/// POST /api/buyer/quotes/{id}/accept
pub async fn accept_quote(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiPath(quote_id): ApiPath<QuoteId>,
) -> HandlerResult<QuoteDecisionResponse> {
    let (quote, request) = state.services.repair.accept_quote(buyer.id(), quote_id).await?;
    Ok(ok(
        "QUOTE_ACCEPTED",
        "quote accepted",
        QuoteDecisionResponse { quote, request },
    ))
}

/// POST /api/buyer/quotes/{id}/reject
pub async fn reject_quote(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiPath(quote_id): ApiPath<QuoteId>,
) -> HandlerResult<QuoteDecisionResponse> {
    let (quote, request) = state.services.repair.reject_quote(buyer.id(), quote_id).await?;
    Ok(ok(
        "QUOTE_REJECTED",
        "quote rejected",
        QuoteDecisionResponse { quote, request },
    ))
}

/// POST /api/buyer/repair-requests/{id}/cancel
///
/// The body is optional; `{"reason": "..."}` records why.
pub async fn cancel_repair_request(
    State(state): State<AppState>,
    buyer: BuyerUser,
    ApiPath(request_id): ApiPath<RepairRequestId>,
    body: Bytes,
) -> HandlerResult<RepairRequest> {
    let reason = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        serde_json::from_slice::<ReasonRequest>(&body)
            .map_err(|e| AppError::InvalidRequest(format!("invalid JSON body: {e}")))?
            .reason
    };
    let request = state
        .services
        .repair
        .cancel_request(buyer.id(), request_id, reason)
        .await?;
    Ok(ok("REPAIR_REQUEST_CANCELLED", "repair request cancelled", request))
}
