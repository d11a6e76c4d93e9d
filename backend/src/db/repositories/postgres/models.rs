//! Diesel row types and their conversions to domain records.
//!
//! Enum columns are stored as their wire strings; a row with an unknown
//! value is reported as an internal error rather than silently dropped.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use std::str::FromStr;

use super::schema::{
    audit_logs, one_time_tokens, order_items, orders, products, refresh_tokens, repair_quotes,
    repair_requests, users,
};
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult};
use crate::models::*;

fn parse_column<T>(value: &str, column: &str) -> RepositoryResult<T>
where
    T: FromStr<Err = String>,
{
    value.parse::<T>().map_err(|e| {
        RepositoryError::internal_with_context(e, ErrorContext::new("decode_row").with_entity(column))
    })
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub status: String,
    pub email_verified: bool,
    pub kyc_status: String,
    pub kyc_business_name: Option<String>,
    pub kyc_registration_number: Option<String>,
    pub kyc_document_url: Option<String>,
    pub kyc_rejection_reason: Option<String>,
    pub mfa_secret: Option<String>,
    pub mfa_enabled: bool,
    pub mfa_last_step: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> RepositoryResult<Self> {
        let kyc = match (
            row.kyc_business_name,
            row.kyc_registration_number,
            row.kyc_document_url,
        ) {
            (Some(business_name), Some(registration_number), Some(document_url)) => {
                Some(KycDetails {
                    business_name,
                    registration_number,
                    document_url,
                    rejection_reason: row.kyc_rejection_reason,
                })
            }
            _ => None,
        };
        Ok(User {
            id: UserId(row.id),
            email: row.email,
            password_hash: row.password_hash,
            name: row.name,
            phone: row.phone,
            role: parse_column(&row.role, "users.role")?,
            status: parse_column(&row.status, "users.status")?,
            email_verified: row.email_verified,
            kyc_status: parse_column(&row.kyc_status, "users.kyc_status")?,
            kyc,
            mfa_secret: row.mfa_secret,
            mfa_enabled: row.mfa_enabled,
            mfa_last_step: row.mfa_last_step,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUserRow {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub email_verified: bool,
}

impl From<NewUser> for NewUserRow {
    fn from(user: NewUser) -> Self {
        Self {
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone: user.phone,
            role: user.role.as_str().to_string(),
            email_verified: user.email_verified,
        }
    }
}

/// Profile edit; `None` fields are left as they are.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
pub struct ProfileChangeset {
    pub name: Option<String>,
    pub phone: Option<Option<String>>,
    pub updated_at: DateTime<Utc>,
}

/// Submitted verification details; the previous rejection reason is cleared.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
pub struct KycSubmissionChangeset {
    pub kyc_status: String,
    pub kyc_business_name: Option<String>,
    pub kyc_registration_number: Option<String>,
    pub kyc_document_url: Option<String>,
    pub kyc_rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl KycSubmissionChangeset {
    pub fn new(details: KycDetails, now: DateTime<Utc>) -> Self {
        Self {
            kyc_status: KycStatus::Pending.as_str().to_string(),
            kyc_business_name: Some(details.business_name),
            kyc_registration_number: Some(details.registration_number),
            kyc_document_url: Some(details.document_url),
            kyc_rejection_reason: None,
            updated_at: now,
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = refresh_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RefreshTokenRow {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        Self {
            id: row.id,
            user_id: UserId(row.user_id),
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            replaced_by: row.replaced_by,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshTokenRow {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl From<NewRefreshToken> for NewRefreshTokenRow {
    fn from(token: NewRefreshToken) -> Self {
        Self {
            user_id: token.user_id.0,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = one_time_tokens)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OneTimeTokenRow {
    pub id: i64,
    pub user_id: i64,
    pub purpose: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<OneTimeTokenRow> for OneTimeTokenRecord {
    type Error = RepositoryError;

    fn try_from(row: OneTimeTokenRow) -> RepositoryResult<Self> {
        Ok(Self {
            id: row.id,
            user_id: UserId(row.user_id),
            purpose: parse_column(&row.purpose, "one_time_tokens.purpose")?,
            token_hash: row.token_hash,
            expires_at: row.expires_at,
            used_at: row.used_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = one_time_tokens)]
pub struct NewOneTimeTokenRow {
    pub user_id: i64,
    pub purpose: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl From<NewOneTimeToken> for NewOneTimeTokenRow {
    fn from(token: NewOneTimeToken) -> Self {
        Self {
            user_id: token.user_id.0,
            purpose: token.purpose.as_str().to_string(),
            token_hash: token.token_hash,
            expires_at: token.expires_at,
        }
    }
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductRow {
    pub id: i64,
    pub seller_id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub condition: String,
    pub price_cents: i64,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = RepositoryError;

    fn try_from(row: ProductRow) -> RepositoryResult<Self> {
        Ok(Product {
            id: ProductId(row.id),
            seller_id: UserId(row.seller_id),
            name: row.name,
            description: row.description,
            category: row.category,
            condition: parse_column(&row.condition, "products.condition")?,
            price_cents: row.price_cents,
            quantity: row.quantity,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = products)]
pub struct NewProductRow {
    pub seller_id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub condition: String,
    pub price_cents: i64,
    pub quantity: i32,
}

impl NewProductRow {
    pub fn new(seller_id: UserId, product: NewProduct) -> Self {
        Self {
            seller_id: seller_id.0,
            name: product.name,
            description: product.description,
            category: product.category,
            condition: product.condition.as_str().to_string(),
            price_cents: product.price_cents,
            quantity: product.quantity,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub total_cents: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn into_order(self, items: Vec<OrderItem>) -> RepositoryResult<Order> {
        Ok(Order {
            id: OrderId(self.id),
            buyer_id: UserId(self.buyer_id),
            seller_id: UserId(self.seller_id),
            items,
            total_cents: self.total_cents,
            status: parse_column(&self.status, "orders.status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrderRow {
    pub buyer_id: i64,
    pub seller_id: i64,
    pub total_cents: i64,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

impl From<OrderItemRow> for OrderItem {
    fn from(row: OrderItemRow) -> Self {
        Self {
            product_id: ProductId(row.product_id),
            name: row.name,
            unit_price_cents: row.unit_price_cents,
            quantity: row.quantity,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_items)]
pub struct NewOrderItemRow {
    pub order_id: i64,
    pub product_id: i64,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

// =============================================================================
// Repairs
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = repair_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RepairRequestRow {
    pub id: i64,
    pub buyer_id: i64,
    pub repair_center_id: i64,
    pub device_type: String,
    pub brand: String,
    pub model: String,
    pub issue_description: String,
    pub status: String,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RepairRequestRow> for RepairRequest {
    type Error = RepositoryError;

    fn try_from(row: RepairRequestRow) -> RepositoryResult<Self> {
        Ok(RepairRequest {
            id: RepairRequestId(row.id),
            buyer_id: UserId(row.buyer_id),
            repair_center_id: UserId(row.repair_center_id),
            device_type: row.device_type,
            brand: row.brand,
            model: row.model,
            issue_description: row.issue_description,
            status: parse_column(&row.status, "repair_requests.status")?,
            cancellation_reason: row.cancellation_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = repair_requests)]
pub struct NewRepairRequestRow {
    pub buyer_id: i64,
    pub repair_center_id: i64,
    pub device_type: String,
    pub brand: String,
    pub model: String,
    pub issue_description: String,
    pub status: String,
}

impl NewRepairRequestRow {
    pub fn new(buyer_id: UserId, request: NewRepairRequest) -> Self {
        Self {
            buyer_id: buyer_id.0,
            repair_center_id: request.repair_center_id.0,
            device_type: request.device_type,
            brand: request.brand,
            model: request.model,
            issue_description: request.issue_description,
            status: RepairStatus::Pending.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = repair_quotes)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RepairQuoteRow {
    pub id: i64,
    pub request_id: i64,
    pub repair_center_id: i64,
    pub labor_cents: i64,
    pub parts_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub estimated_days: i32,
    pub notes: Option<String>,
    pub valid_until: DateTime<Utc>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<RepairQuoteRow> for RepairQuote {
    type Error = RepositoryError;

    fn try_from(row: RepairQuoteRow) -> RepositoryResult<Self> {
        Ok(RepairQuote {
            id: QuoteId(row.id),
            request_id: RepairRequestId(row.request_id),
            repair_center_id: UserId(row.repair_center_id),
            labor_cents: row.labor_cents,
            parts_cents: row.parts_cents,
            tax_cents: row.tax_cents,
            total_cents: row.total_cents,
            estimated_days: row.estimated_days,
            notes: row.notes,
            valid_until: row.valid_until,
            status: parse_column(&row.status, "repair_quotes.status")?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = repair_quotes)]
pub struct NewRepairQuoteRow {
    pub request_id: i64,
    pub repair_center_id: i64,
    pub labor_cents: i64,
    pub parts_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub estimated_days: i32,
    pub notes: Option<String>,
    pub valid_until: DateTime<Utc>,
    pub status: String,
}

// =============================================================================
// Audit
// =============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = audit_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AuditRow {
    pub id: i64,
    pub actor_id: i64,
    pub actor_role: String,
    pub method: String,
    pub path: String,
    pub status_code: i32,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = RepositoryError;

    fn try_from(row: AuditRow) -> RepositoryResult<Self> {
        let status_code = u16::try_from(row.status_code).map_err(|e| {
            RepositoryError::internal_with_context(
                e.to_string(),
                ErrorContext::new("decode_row").with_entity("audit_logs.status_code"),
            )
        })?;
        Ok(AuditEntry {
            id: row.id,
            actor_id: UserId(row.actor_id),
            actor_role: parse_column(&row.actor_role, "audit_logs.actor_role")?,
            method: row.method,
            path: row.path,
            status_code,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = audit_logs)]
pub struct NewAuditRow {
    pub actor_id: i64,
    pub actor_role: String,
    pub method: String,
    pub path: String,
    pub status_code: i32,
}

impl From<NewAuditEntry> for NewAuditRow {
    fn from(entry: NewAuditEntry) -> Self {
        Self {
            actor_id: entry.actor_id.0,
            actor_role: entry.actor_role.as_str().to_string(),
            method: entry.method,
            path: entry.path,
            status_code: i32::from(entry.status_code),
        }
    }
}

/// Convert a batch of rows, failing on the first undecodable one.
pub fn convert_rows<R, T>(rows: Vec<R>) -> RepositoryResult<Vec<T>>
where
    T: TryFrom<R, Error = RepositoryError>,
{
    rows.into_iter().map(T::try_from).collect()
}
