//! Product and order persistence, including atomic stock reservation.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{
    CartLine, NewProduct, Order, OrderId, OrderStatus, Product, ProductFilter, ProductId, UserId,
};

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub buyer_id: Option<UserId>,
    pub seller_id: Option<UserId>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.buyer_id.map_or(true, |b| b == order.buyer_id)
            && self.seller_id.map_or(true, |s| s == order.seller_id)
            && self.status.map_or(true, |s| s == order.status)
    }
}

/// Result of a checkout attempt. Anything but `Placed` left stock untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// One order per seller, in ascending seller order.
    Placed(Vec<Order>),
    ProductNotFound(ProductId),
    InsufficientStock {
        product_id: ProductId,
        available: i32,
        requested: i32,
    },
    /// An order total, or the sum over all orders, does not fit in an `i64`.
    TotalOverflow,
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create_product(
        &self,
        seller_id: UserId,
        product: NewProduct,
    ) -> RepositoryResult<Product>;

    async fn get_product(&self, id: ProductId) -> RepositoryResult<Option<Product>>;

    /// List products matching `filter`, newest first.
    async fn list_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<Product>, u64)>;

    /// Reserve stock for every line and create the orders, all or nothing.
    ///
    /// `lines` must already be merged (one line per product). Prices and names
    /// are snapshotted from the product rows read inside the same unit of work.
    async fn place_orders(
        &self,
        buyer_id: UserId,
        lines: &[CartLine],
    ) -> RepositoryResult<CheckoutOutcome>;

    async fn get_order(&self, id: OrderId) -> RepositoryResult<Option<Order>>;

    /// List orders matching `filter`, newest first.
    async fn list_orders(
        &self,
        filter: &OrderFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<Order>, u64)>;

    /// Compare-and-set the order status.
    ///
    /// Moving to `Cancelled` returns the reserved quantities to stock in the
    /// same unit of work.
    ///
    /// # Returns
    /// * `Ok(Some(order))` - The updated order
    /// * `Ok(None)` - The order is missing or no longer in `from`
    async fn transition_order(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepositoryResult<Option<Order>>;
}
