//! Product listings and orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserId;

crate::define_id_type!(i64, ProductId);
crate::define_id_type!(i64, OrderId);

crate::define_string_enum!(
    ProductCondition {
        New => "new",
        Refurbished => "refurbished",
        Used => "used",
        ForParts => "for_parts",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub seller_id: UserId,
    pub name: String,
    pub description: String,
    pub category: String,
    pub condition: ProductCondition,
    pub price_cents: i64,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub condition: ProductCondition,
    pub price_cents: i64,
    pub quantity: i32,
}

/// Listing filter. `in_stock_only` hides sold-out products from buyers.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub seller_id: Option<UserId>,
    pub category: Option<String>,
    pub in_stock_only: bool,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        self.seller_id.map_or(true, |s| s == product.seller_id)
            && self
                .category
                .as_deref()
                .map_or(true, |c| c.eq_ignore_ascii_case(&product.category))
            && (!self.in_stock_only || product.quantity > 0)
    }
}

crate::define_string_enum!(
    OrderStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Shipped => "shipped",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
);

impl OrderStatus {
    /// Statuses reachable in one step from `self`.
    pub fn next_statuses(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Shipped, Cancelled],
            Shipped => &[Delivered],
            Delivered | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.next_statuses().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_statuses().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    /// Product name at the time of purchase.
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

impl OrderItem {
    /// `None` when the line total does not fit in an `i64`.
    pub fn line_total_cents(&self) -> Option<i64> {
        self.unit_price_cents.checked_mul(i64::from(self.quantity))
    }
}

/// Checked sum of the line totals of `items`.
pub fn items_total_cents(items: &[OrderItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |sum, item| sum.checked_add(item.line_total_cents()?))
}

/// Checked sum of the totals of `orders`.
pub fn orders_total_cents(orders: &[Order]) -> Option<i64> {
    orders
        .iter()
        .try_fold(0i64, |sum, order| sum.checked_add(order.total_cents))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub items: Vec<OrderItem>,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A requested checkout line before reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i32,
}
