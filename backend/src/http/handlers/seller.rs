//! Seller endpoints: listings and order fulfilment.

use axum::extract::State;

use super::{CreatedResult, HandlerResult};
use crate::http::dto::{created, ok, page_of, BulkUploadRequest, OrderListQuery, OrderStatusRequest, PageQuery};
use crate::http::extract::{ApiJson, ApiPath, ApiQuery, SellerUser};
use crate::http::state::AppState;
use crate::models::{NewProduct, Order, OrderId, Product};
use crate::services::catalog::BulkUploadReport;
use crate::services::Paginated;

/// POST /api/seller/products
pub async fn create_product(
    State(state): State<AppState>,
    seller: SellerUser,
    ApiJson(product): ApiJson<NewProduct>,
) -> CreatedResult<Product> {
    let product = state
        .services
        .catalog
        .create_product(seller.id(), product)
        .await?;
    Ok(created("PRODUCT_CREATED", "product listed", product))
}

/// POST /api/seller/products/bulk
pub async fn bulk_create_products(
    State(state): State<AppState>,
    seller: SellerUser,
    ApiJson(body): ApiJson<BulkUploadRequest>,
) -> HandlerResult<BulkUploadReport> {
    let report = state
        .services
        .catalog
        .bulk_create_products(seller.id(), body.items)
        .await?;
    let message = format!("{} created, {} failed", report.created, report.failed);
    Ok(ok("BULK_UPLOAD_PROCESSED", &message, report))
}

/// GET /api/seller/products
pub async fn list_products(
    State(state): State<AppState>,
    seller: SellerUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> HandlerResult<Paginated<Product>> {
    let products = state
        .services
        .catalog
        .list_seller_products(seller.id(), query.page())
        .await?;
    Ok(ok("PRODUCTS", "products retrieved", products))
}

/// GET /api/seller/orders
pub async fn list_orders(
    State(state): State<AppState>,
    seller: SellerUser,
    ApiQuery(query): ApiQuery<OrderListQuery>,
) -> HandlerResult<Paginated<Order>> {
    let orders = state
        .services
        .catalog
        .list_seller_orders(seller.id(), query.status, page_of(query.page, query.limit))
        .await?;
    Ok(ok("ORDERS", "orders retrieved", orders))
}

/// PATCH /api/seller/orders/{id}/status
pub async fn update_order_status(
    State(state): State<AppState>,
    seller: SellerUser,
    ApiPath(order_id): ApiPath<OrderId>,
    ApiJson(body): ApiJson<OrderStatusRequest>,
) -> HandlerResult<Order> {
    let order = state
        .services
        .catalog
        .update_order_status(seller.id(), order_id, body.status)
        .await?;
    Ok(ok("ORDER_STATUS_UPDATED", "order status updated", order))
}
