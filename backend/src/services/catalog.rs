//! Product listings, checkout and order fulfilment.
//!
//! Stock is reserved by the repository in the same step that writes the
//! orders, so a checkout either takes every line or leaves stock untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{codes, ServiceError, ServiceResult};
use super::pagination::{Page, Paginated};
use crate::db::repository::{
    CatalogRepository, CheckoutOutcome, FullRepository, OrderFilter, UserRepository,
};
use crate::models::{
    CartLine, NewProduct, Order, OrderId, OrderStatus, Product, ProductFilter, ProductId, Role,
    UserId,
};

pub const MAX_BULK_ITEMS: usize = 100;
pub const MAX_CHECKOUT_LINES: usize = 100;
const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkItemError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkUploadReport {
    pub created: usize,
    pub failed: usize,
    pub errors: Vec<BulkItemError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartLine>,
}

/// Trim and range-check a listing before it is stored.
pub fn validate_product(mut product: NewProduct) -> Result<NewProduct, String> {
    product.name = product.name.trim().to_string();
    product.category = product.category.trim().to_string();
    product.description = product.description.trim().to_string();

    if product.name.is_empty() {
        return Err("name is required".to_string());
    }
    if product.name.chars().count() > MAX_NAME_LEN {
        return Err(format!("name must be at most {MAX_NAME_LEN} characters"));
    }
    if product.category.is_empty() {
        return Err("category is required".to_string());
    }
    if product.price_cents < 0 {
        return Err("price_cents must not be negative".to_string());
    }
    if product.quantity < 0 {
        return Err("quantity must not be negative".to_string());
    }
    Ok(product)
}

/// Merge repeated products into one line each, keeping first-seen order.
pub fn merge_cart_lines(lines: &[CartLine]) -> ServiceResult<Vec<CartLine>> {
    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    let mut positions: BTreeMap<ProductId, usize> = BTreeMap::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::validation(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        match positions.get(&line.product_id) {
            Some(&pos) => {
                merged[pos].quantity = merged[pos]
                    .quantity
                    .checked_add(line.quantity)
                    .ok_or_else(|| ServiceError::validation("quantity is too large"))?;
            }
            None => {
                positions.insert(line.product_id, merged.len());
                merged.push(*line);
            }
        }
    }
    Ok(merged)
}

#[derive(Clone)]
pub struct CatalogService {
    repo: Arc<dyn FullRepository>,
}

impl CatalogService {
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self { repo }
    }

    async fn require_verified_seller(&self, seller_id: UserId) -> ServiceResult<()> {
        let seller = self
            .repo
            .find_user_by_id(seller_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(codes::USER_NOT_FOUND, "user not found"))?;
        if seller.role != Role::Seller {
            return Err(ServiceError::forbidden(codes::FORBIDDEN, "only sellers can list products"));
        }
        if !seller.is_kyc_approved() {
            return Err(ServiceError::forbidden(
                codes::KYC_REQUIRED,
                "business verification must be approved before listing products",
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn create_product(&self, seller_id: UserId, product: NewProduct) -> ServiceResult<Product> {
        self.require_verified_seller(seller_id).await?;
        let product = validate_product(product).map_err(ServiceError::validation)?;
        let product = self.repo.create_product(seller_id, product).await?;
        info!(seller_id = %seller_id, product_id = %product.id, "product listed");
        Ok(product)
    }

    /// Each item is parsed, validated and stored on its own; failures are
    /// reported by index and do not stop the batch.
    pub async fn bulk_create_products(
        &self,
        seller_id: UserId,
        items: Vec<serde_json::Value>,
    ) -> ServiceResult<BulkUploadReport> {
        if items.is_empty() {
            return Err(ServiceError::validation("at least one product is required"));
        }
        if items.len() > MAX_BULK_ITEMS {
            return Err(ServiceError::validation(format!(
                "at most {MAX_BULK_ITEMS} products per upload"
            )));
        }
        self.require_verified_seller(seller_id).await?;

        let mut report = BulkUploadReport {
            created: 0,
            failed: 0,
            errors: Vec::new(),
        };
        for (index, raw) in items.into_iter().enumerate() {
            let parsed = serde_json::from_value::<NewProduct>(raw)
                .map_err(|e| e.to_string())
                .and_then(validate_product);
            let outcome = match parsed {
                Ok(product) => self
                    .repo
                    .create_product(seller_id, product)
                    .await
                    .map_err(|e| {
                        debug!(index, error = %e, "bulk item insert failed");
                        "could not save product".to_string()
                    }),
                Err(message) => Err(message),
            };
            match outcome {
                Ok(_) => report.created += 1,
                Err(message) => {
                    report.failed += 1;
                    report.errors.push(BulkItemError { index, message });
                }
            }
        }

        info!(
            seller_id = %seller_id,
            created = report.created,
            failed = report.failed,
            "bulk upload processed"
        );
        Ok(report)
    }

    pub async fn list_seller_products(
        &self,
        seller_id: UserId,
        page: Page,
    ) -> ServiceResult<Paginated<Product>> {
        let filter = ProductFilter {
            seller_id: Some(seller_id),
            ..Default::default()
        };
        let (items, total) = self
            .repo
            .list_products(&filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(items, total))
    }

    /// Buyer catalogue: only products with stock left.
    pub async fn browse(&self, category: Option<String>, page: Page) -> ServiceResult<Paginated<Product>> {
        let filter = ProductFilter {
            category: category.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            in_stock_only: true,
            ..Default::default()
        };
        let (items, total) = self
            .repo
            .list_products(&filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(items, total))
    }

    pub async fn get_product(&self, id: ProductId) -> ServiceResult<Product> {
        self.repo
            .get_product(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(codes::PRODUCT_NOT_FOUND, "product not found"))
    }

    // =========================================================================
    // Orders
    // =========================================================================

    /// Place one order per seller for the requested lines.
    pub async fn checkout(&self, buyer_id: UserId, lines: &[CartLine]) -> ServiceResult<Vec<Order>> {
        if lines.is_empty() {
            return Err(ServiceError::validation("at least one item is required"));
        }
        if lines.len() > MAX_CHECKOUT_LINES {
            return Err(ServiceError::validation(format!(
                "at most {MAX_CHECKOUT_LINES} lines per checkout"
            )));
        }
        let merged = merge_cart_lines(lines)?;

        match self.repo.place_orders(buyer_id, &merged).await? {
            CheckoutOutcome::Placed(orders) => {
                info!(
                    buyer_id = %buyer_id,
                    orders = orders.len(),
                    "checkout completed"
                );
                Ok(orders)
            }
            CheckoutOutcome::ProductNotFound(product_id) => Err(ServiceError::not_found(
                codes::PRODUCT_NOT_FOUND,
                format!("product {product_id} not found"),
            )),
            CheckoutOutcome::InsufficientStock {
                product_id,
                available,
                requested,
            } => Err(ServiceError::conflict(
                codes::INSUFFICIENT_STOCK,
                format!("product {product_id} has {available} in stock, {requested} requested"),
            )),
            CheckoutOutcome::TotalOverflow => {
                Err(ServiceError::validation("order total is too large"))
            }
        }
    }

    pub async fn list_buyer_orders(
        &self,
        buyer_id: UserId,
        status: Option<OrderStatus>,
        page: Page,
    ) -> ServiceResult<Paginated<Order>> {
        let filter = OrderFilter {
            buyer_id: Some(buyer_id),
            status,
            ..Default::default()
        };
        let (items, total) = self
            .repo
            .list_orders(&filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(items, total))
    }

    pub async fn list_seller_orders(
        &self,
        seller_id: UserId,
        status: Option<OrderStatus>,
        page: Page,
    ) -> ServiceResult<Paginated<Order>> {
        let filter = OrderFilter {
            seller_id: Some(seller_id),
            status,
            ..Default::default()
        };
        let (items, total) = self
            .repo
            .list_orders(&filter, page.offset(), page.limit)
            .await?;
        Ok(page.wrap(items, total))
    }

    async fn load_order(&self, id: OrderId, visible: impl Fn(&Order) -> bool) -> ServiceResult<Order> {
        self.repo
            .get_order(id)
            .await?
            .filter(|o| visible(o))
            .ok_or_else(|| ServiceError::not_found(codes::ORDER_NOT_FOUND, "order not found"))
    }

    async fn move_order(&self, order: &Order, next: OrderStatus) -> ServiceResult<Order> {
        if !order.status.can_transition_to(next) {
            return Err(ServiceError::invalid_transition(order.status, next));
        }
        self.repo
            .transition_order(order.id, order.status, next)
            .await?
            // Someone else moved it between our read and the write.
            .ok_or_else(|| ServiceError::invalid_transition(order.status, next))
    }

    /// Buyer cancellation; the repository puts the stock back.
    pub async fn cancel_order(&self, buyer_id: UserId, order_id: OrderId) -> ServiceResult<Order> {
        let order = self.load_order(order_id, |o| o.buyer_id == buyer_id).await?;
        let order = self.move_order(&order, OrderStatus::Cancelled).await?;
        info!(buyer_id = %buyer_id, order_id = %order.id, "order cancelled and restocked");
        Ok(order)
    }

    pub async fn update_order_status(
        &self,
        seller_id: UserId,
        order_id: OrderId,
        next: OrderStatus,
    ) -> ServiceResult<Order> {
        let order = self.load_order(order_id, |o| o.seller_id == seller_id).await?;
        let order = self.move_order(&order, next).await?;
        info!(seller_id = %seller_id, order_id = %order.id, status = %order.status, "order status updated");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductCondition;

    fn product(name: &str, price: i64, qty: i32) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            description: String::new(),
            category: "phones".to_string(),
            condition: ProductCondition::Used,
            price_cents: price,
            quantity: qty,
        }
    }

    #[test]
    fn product_validation_trims_and_checks_ranges() {
        assert_eq!(validate_product(product("  Pixel 6 ", 100, 1)).unwrap().name, "Pixel 6");
        assert!(validate_product(product("   ", 100, 1)).is_err());
        assert!(validate_product(product("Pixel", -1, 1)).is_err());
        assert!(validate_product(product("Pixel", 1, -1)).is_err());
        assert!(validate_product(product("Pixel", 0, 0)).is_ok());
    }

    #[test]
    fn duplicate_lines_are_merged() {
        let lines = [
            CartLine { product_id: ProductId(3), quantity: 1 },
            CartLine { product_id: ProductId(1), quantity: 2 },
            CartLine { product_id: ProductId(3), quantity: 4 },
        ];
        let merged = merge_cart_lines(&lines).unwrap();
        assert_eq!(
            merged,
            vec![
                CartLine { product_id: ProductId(3), quantity: 5 },
                CartLine { product_id: ProductId(1), quantity: 2 },
            ]
        );
    }

    #[test]
    fn zero_quantity_line_is_rejected() {
        let lines = [CartLine { product_id: ProductId(1), quantity: 0 }];
        assert!(merge_cart_lines(&lines).is_err());
    }
}
