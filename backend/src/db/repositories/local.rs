//! In-memory local repository implementation.
//!
//! All data lives behind one `RwLock`, so every trait method, including the
//! multi-row ones (rotation, checkout, quote resolution), runs as a single
//! critical section and is atomic with respect to other callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::db::repository::*;
use crate::models::*;

/// In-memory local repository.
///
/// Ideal for unit tests and local development that need isolation and speed.
///
/// # Example
/// ```
/// use ewaste_market::db::repositories::LocalRepository;
/// use ewaste_market::db::repository::UserRepository;
///
/// tokio::runtime::Runtime::new().unwrap().block_on(async {
///     let repo = LocalRepository::new();
///     assert!(repo.health_check().await.unwrap());
/// });
/// ```
#[derive(Clone, Default)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

struct LocalData {
    users: BTreeMap<UserId, User>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    one_time_tokens: HashMap<String, OneTimeTokenRecord>,
    products: BTreeMap<ProductId, Product>,
    orders: BTreeMap<OrderId, Order>,
    repair_requests: BTreeMap<RepairRequestId, RepairRequest>,
    quotes: BTreeMap<QuoteId, RepairQuote>,
    audit: Vec<AuditEntry>,

    next_id: i64,

    // Connection health
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            refresh_tokens: HashMap::new(),
            one_time_tokens: HashMap::new(),
            products: BTreeMap::new(),
            orders: BTreeMap::new(),
            repair_requests: BTreeMap::new(),
            quotes: BTreeMap::new(),
            audit: Vec::new(),
            next_id: 1,
            is_healthy: true,
        }
    }
}

impl LocalData {
    /// IDs are drawn from one sequence, which keeps them unique across tables.
    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Cut one page out of an already ordered result set.
fn window<T>(items: Vec<T>, offset: u64, limit: u64) -> (Vec<T>, u64) {
    let total = items.len() as u64;
    let page = items
        .into_iter()
        .skip(usize::try_from(offset).unwrap_or(usize::MAX))
        .take(usize::try_from(limit).unwrap_or(usize::MAX))
        .collect();
    (page, total)
}

/// Apply `update` in place. Returns `false`, leaving `user` untouched, when
/// the account is not in the state the update requires.
fn apply_user_update(user: &mut User, update: UserUpdate) -> bool {
    match update {
        UserUpdate::Profile { name, phone } => {
            if let Some(name) = name {
                user.name = name;
            }
            if let Some(phone) = phone {
                user.phone = phone;
            }
        }
        UserUpdate::Status(status) => user.status = status,
        UserUpdate::EmailVerified => user.email_verified = true,
        UserUpdate::PasswordHash(hash) => user.password_hash = hash,
        UserUpdate::SubmitKyc(details) => {
            if !matches!(user.kyc_status, KycStatus::NotSubmitted | KycStatus::Rejected) {
                return false;
            }
            user.kyc = Some(KycDetails {
                rejection_reason: None,
                ..details
            });
            user.kyc_status = KycStatus::Pending;
        }
        UserUpdate::ReviewKyc {
            approved,
            rejection_reason,
        } => {
            if user.kyc_status != KycStatus::Pending {
                return false;
            }
            user.kyc_status = if approved {
                KycStatus::Approved
            } else {
                KycStatus::Rejected
            };
            if let Some(kyc) = user.kyc.as_mut() {
                kyc.rejection_reason = rejection_reason;
            }
        }
        UserUpdate::MfaSecret(secret) => {
            if user.mfa_enabled {
                return false;
            }
            user.mfa_secret = Some(secret);
            user.mfa_last_step = None;
        }
        UserUpdate::EnableMfa { secret, step } => {
            if user.mfa_enabled || user.mfa_secret.as_deref() != Some(secret.as_str()) {
                return false;
            }
            user.mfa_enabled = true;
            user.mfa_last_step = Some(step);
        }
        UserUpdate::DisableMfa => {
            if !user.mfa_enabled {
                return false;
            }
            user.mfa_enabled = false;
            user.mfa_secret = None;
            user.mfa_last_step = None;
        }
        UserUpdate::MfaStepUsed(step) => {
            if !user.mfa_enabled || user.mfa_last_step.is_some_and(|last| last >= step) {
                return false;
            }
            user.mfa_last_step = Some(step);
        }
    }
    true
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    pub fn user_count(&self) -> usize {
        self.data.read().users.len()
    }

    /// Live (unrevoked) refresh tokens held by a user.
    pub fn active_refresh_token_count(&self, user_id: UserId) -> usize {
        self.data
            .read()
            .refresh_tokens
            .values()
            .filter(|t| t.user_id == user_id && !t.is_revoked())
            .count()
    }

    fn ensure_healthy(&self) -> RepositoryResult<()> {
        if self.data.read().is_healthy {
            Ok(())
        } else {
            Err(RepositoryError::connection("local repository marked unhealthy"))
        }
    }
}

#[async_trait]
impl UserRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn create_user(&self, user: NewUser) -> RepositoryResult<User> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        if data.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::conflict_with_context(
                "email already registered",
                ErrorContext::new("create_user").with_entity("user"),
            ));
        }

        let now = Utc::now();
        let id = UserId(data.allocate_id());
        let record = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            phone: user.phone,
            role: user.role,
            status: AccountStatus::Active,
            email_verified: user.email_verified,
            kyc_status: KycStatus::NotSubmitted,
            kyc: None,
            mfa_secret: None,
            mfa_enabled: false,
            mfa_last_step: None,
            created_at: now,
            updated_at: now,
        };
        data.users.insert(id, record.clone());
        Ok(record)
    }

    async fn find_user_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        self.ensure_healthy()?;
        Ok(self.data.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        self.ensure_healthy()?;
        Ok(self
            .data
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn update_user(&self, id: UserId, update: UserUpdate) -> RepositoryResult<Option<User>> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let stored = data.users.get_mut(&id).ok_or_else(|| {
            RepositoryError::not_found_with_context(
                "user not found",
                ErrorContext::new("update_user")
                    .with_entity("user")
                    .with_entity_id(id),
            )
        })?;
        if !apply_user_update(stored, update) {
            return Ok(None);
        }
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<User>, u64)> {
        self.ensure_healthy()?;
        let matches: Vec<User> = self
            .data
            .read()
            .users
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        Ok(window(matches, offset, limit))
    }
}

#[async_trait]
impl TokenRepository for LocalRepository {
    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> RepositoryResult<RefreshTokenRecord> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        if data.refresh_tokens.contains_key(&token.token_hash) {
            return Err(RepositoryError::conflict("refresh token digest collision"));
        }
        let record = RefreshTokenRecord {
            id: data.allocate_id(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            revoked_at: None,
            replaced_by: None,
            created_at: Utc::now(),
        };
        data.refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> RepositoryResult<Option<RefreshTokenRecord>> {
        self.ensure_healthy()?;
        Ok(self.data.read().refresh_tokens.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RotationOutcome> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let (user_id, revoked, expired) = match data.refresh_tokens.get(token_hash) {
            None => return Ok(RotationOutcome::NotFound),
            Some(t) => (t.user_id, t.is_revoked(), t.is_expired_at(now)),
        };
        if expired {
            return Ok(RotationOutcome::Expired { user_id });
        }
        if revoked {
            return Ok(RotationOutcome::Reused { user_id });
        }

        let new_id = data.allocate_id();
        if let Some(old) = data.refresh_tokens.get_mut(token_hash) {
            old.revoked_at = Some(now);
            old.replaced_by = Some(replacement.token_hash.clone());
        }
        data.refresh_tokens.insert(
            replacement.token_hash.clone(),
            RefreshTokenRecord {
                id: new_id,
                user_id: replacement.user_id,
                token_hash: replacement.token_hash,
                expires_at: replacement.expires_at,
                revoked_at: None,
                replaced_by: None,
                created_at: now,
            },
        );
        Ok(RotationOutcome::Rotated { user_id })
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        match data.refresh_tokens.get_mut(token_hash) {
            Some(token) if !token.is_revoked() => {
                token.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_tokens(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let mut revoked = 0;
        for token in data.refresh_tokens.values_mut() {
            if token.user_id == user_id && !token.is_revoked() {
                token.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn insert_one_time_token(
        &self,
        token: NewOneTimeToken,
    ) -> RepositoryResult<OneTimeTokenRecord> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        if data.one_time_tokens.contains_key(&token.token_hash) {
            return Err(RepositoryError::conflict("one-time token digest collision"));
        }
        let record = OneTimeTokenRecord {
            id: data.allocate_id(),
            user_id: token.user_id,
            purpose: token.purpose,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            used_at: None,
            created_at: Utc::now(),
        };
        data.one_time_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(record)
    }

    async fn consume_one_time_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<OneTimeTokenRecord>> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        match data.one_time_tokens.get_mut(token_hash) {
            Some(token)
                if token.purpose == purpose && token.used_at.is_none() && now < token.expires_at =>
            {
                token.used_at = Some(now);
                Ok(Some(token.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn invalidate_one_time_tokens(
        &self,
        user_id: UserId,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let mut count = 0;
        for token in data.one_time_tokens.values_mut() {
            if token.user_id == user_id && token.purpose == purpose && token.used_at.is_none() {
                token.used_at = Some(now);
                count += 1;
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl CatalogRepository for LocalRepository {
    async fn create_product(
        &self,
        seller_id: UserId,
        product: NewProduct,
    ) -> RepositoryResult<Product> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let id = ProductId(data.allocate_id());
        let record = Product {
            id,
            seller_id,
            name: product.name,
            description: product.description,
            category: product.category,
            condition: product.condition,
            price_cents: product.price_cents,
            quantity: product.quantity,
            created_at: Utc::now(),
        };
        data.products.insert(id, record.clone());
        Ok(record)
    }

    async fn get_product(&self, id: ProductId) -> RepositoryResult<Option<Product>> {
        self.ensure_healthy()?;
        Ok(self.data.read().products.get(&id).cloned())
    }

    async fn list_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<Product>, u64)> {
        self.ensure_healthy()?;
        let matches: Vec<Product> = self
            .data
            .read()
            .products
            .values()
            .rev()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        Ok(window(matches, offset, limit))
    }

    async fn place_orders(
        &self,
        buyer_id: UserId,
        lines: &[CartLine],
    ) -> RepositoryResult<CheckoutOutcome> {
        self.ensure_healthy()?;
        let mut data = self.data.write();

        // Validate every line before touching stock.
        let mut by_seller: BTreeMap<UserId, Vec<OrderItem>> = BTreeMap::new();
        for line in lines {
            let product = match data.products.get(&line.product_id) {
                Some(p) => p,
                None => return Ok(CheckoutOutcome::ProductNotFound(line.product_id)),
            };
            if product.quantity < line.quantity {
                return Ok(CheckoutOutcome::InsufficientStock {
                    product_id: product.id,
                    available: product.quantity,
                    requested: line.quantity,
                });
            }
            by_seller.entry(product.seller_id).or_default().push(OrderItem {
                product_id: product.id,
                name: product.name.clone(),
                unit_price_cents: product.price_cents,
                quantity: line.quantity,
            });
        }

        let mut totals = Vec::with_capacity(by_seller.len());
        let mut grand_total = 0i64;
        for items in by_seller.values() {
            let total = match items_total_cents(items) {
                Some(total) => total,
                None => return Ok(CheckoutOutcome::TotalOverflow),
            };
            grand_total = match grand_total.checked_add(total) {
                Some(sum) => sum,
                None => return Ok(CheckoutOutcome::TotalOverflow),
            };
            totals.push(total);
        }

        for line in lines {
            if let Some(product) = data.products.get_mut(&line.product_id) {
                product.quantity -= line.quantity;
            }
        }

        let now = Utc::now();
        let mut orders = Vec::with_capacity(by_seller.len());
        for ((seller_id, items), total_cents) in by_seller.into_iter().zip(totals) {
            let id = OrderId(data.allocate_id());
            let order = Order {
                id,
                buyer_id,
                seller_id,
                items,
                total_cents,
                status: OrderStatus::Pending,
                created_at: now,
                updated_at: now,
            };
            data.orders.insert(id, order.clone());
            orders.push(order);
        }
        Ok(CheckoutOutcome::Placed(orders))
    }

    async fn get_order(&self, id: OrderId) -> RepositoryResult<Option<Order>> {
        self.ensure_healthy()?;
        Ok(self.data.read().orders.get(&id).cloned())
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<Order>, u64)> {
        self.ensure_healthy()?;
        let matches: Vec<Order> = self
            .data
            .read()
            .orders
            .values()
            .rev()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        Ok(window(matches, offset, limit))
    }

    async fn transition_order(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepositoryResult<Option<Order>> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let items = match data.orders.get(&id) {
            Some(order) if order.status == from => order.items.clone(),
            _ => return Ok(None),
        };

        if to == OrderStatus::Cancelled {
            for item in &items {
                if let Some(product) = data.products.get_mut(&item.product_id) {
                    product.quantity += item.quantity;
                }
            }
        }

        Ok(data.orders.get_mut(&id).map(|order| {
            order.status = to;
            order.updated_at = Utc::now();
            order.clone()
        }))
    }
}

#[async_trait]
impl RepairRepository for LocalRepository {
    async fn create_repair_request(
        &self,
        buyer_id: UserId,
        request: NewRepairRequest,
    ) -> RepositoryResult<RepairRequest> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let id = RepairRequestId(data.allocate_id());
        let now = Utc::now();
        let record = RepairRequest {
            id,
            buyer_id,
            repair_center_id: request.repair_center_id,
            device_type: request.device_type,
            brand: request.brand,
            model: request.model,
            issue_description: request.issue_description,
            status: RepairStatus::Pending,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        data.repair_requests.insert(id, record.clone());
        Ok(record)
    }

    async fn get_repair_request(
        &self,
        id: RepairRequestId,
    ) -> RepositoryResult<Option<RepairRequest>> {
        self.ensure_healthy()?;
        Ok(self.data.read().repair_requests.get(&id).cloned())
    }

    async fn list_repair_requests(
        &self,
        filter: &RepairFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<RepairRequest>, u64)> {
        self.ensure_healthy()?;
        let matches: Vec<RepairRequest> = self
            .data
            .read()
            .repair_requests
            .values()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        Ok(window(matches, offset, limit))
    }

    async fn transition_repair_request(
        &self,
        id: RepairRequestId,
        from: RepairStatus,
        to: RepairStatus,
        reason: Option<String>,
    ) -> RepositoryResult<Option<RepairRequest>> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let updated = match data.repair_requests.get_mut(&id) {
            Some(request) if request.status == from => {
                request.status = to;
                if to == RepairStatus::Cancelled {
                    request.cancellation_reason = reason;
                }
                request.updated_at = Utc::now();
                request.clone()
            }
            _ => return Ok(None),
        };
        if to == RepairStatus::Cancelled {
            for quote in data.quotes.values_mut() {
                if quote.request_id == id && quote.status == QuoteStatus::Pending {
                    quote.status = QuoteStatus::Rejected;
                }
            }
        }
        Ok(Some(updated))
    }

    async fn issue_quote(
        &self,
        request_id: RepairRequestId,
        repair_center_id: UserId,
        terms: QuoteTerms,
        total_cents: i64,
    ) -> RepositoryResult<Option<RepairQuote>> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let now = Utc::now();
        match data.repair_requests.get_mut(&request_id) {
            Some(request) if request.status == RepairStatus::Pending => {
                request.status = RepairStatus::Quoted;
                request.updated_at = now;
            }
            _ => return Ok(None),
        }

        let id = QuoteId(data.allocate_id());
        let quote = RepairQuote {
            id,
            request_id,
            repair_center_id,
            labor_cents: terms.labor_cents,
            parts_cents: terms.parts_cents,
            tax_cents: terms.tax_cents,
            total_cents,
            estimated_days: terms.estimated_days,
            notes: terms.notes,
            valid_until: terms.valid_until,
            status: QuoteStatus::Pending,
            created_at: now,
        };
        data.quotes.insert(id, quote.clone());
        Ok(Some(quote))
    }

    async fn get_quote(&self, id: QuoteId) -> RepositoryResult<Option<RepairQuote>> {
        self.ensure_healthy()?;
        Ok(self.data.read().quotes.get(&id).cloned())
    }

    async fn list_quotes(
        &self,
        request_id: RepairRequestId,
    ) -> RepositoryResult<Vec<RepairQuote>> {
        self.ensure_healthy()?;
        Ok(self
            .data
            .read()
            .quotes
            .values()
            .rev()
            .filter(|q| q.request_id == request_id)
            .cloned()
            .collect())
    }

    async fn resolve_quote(
        &self,
        quote_id: QuoteId,
        quote_status: QuoteStatus,
        request_from: RepairStatus,
        request_to: RepairStatus,
    ) -> RepositoryResult<Option<(RepairQuote, RepairRequest)>> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let request_id = match data.quotes.get(&quote_id) {
            Some(q) if q.status == QuoteStatus::Pending => q.request_id,
            _ => return Ok(None),
        };
        match data.repair_requests.get(&request_id) {
            Some(r) if r.status == request_from => {}
            _ => return Ok(None),
        }

        let now = Utc::now();
        let quote = match data.quotes.get_mut(&quote_id) {
            Some(q) => {
                q.status = quote_status;
                q.clone()
            }
            None => return Ok(None),
        };
        let request = match data.repair_requests.get_mut(&request_id) {
            Some(r) => {
                r.status = request_to;
                r.updated_at = now;
                r.clone()
            }
            None => return Ok(None),
        };
        Ok(Some((quote, request)))
    }
}

#[async_trait]
impl AuditRepository for LocalRepository {
    async fn record_audit(&self, entry: NewAuditEntry) -> RepositoryResult<AuditEntry> {
        self.ensure_healthy()?;
        let mut data = self.data.write();
        let record = AuditEntry {
            id: data.allocate_id(),
            actor_id: entry.actor_id,
            actor_role: entry.actor_role,
            method: entry.method,
            path: entry.path,
            status_code: entry.status_code,
            created_at: Utc::now(),
        };
        data.audit.push(record.clone());
        Ok(record)
    }

    async fn list_audit(
        &self,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<AuditEntry>, u64)> {
        self.ensure_healthy()?;
        let entries: Vec<AuditEntry> = self.data.read().audit.iter().rev().cloned().collect();
        Ok(window(entries, offset, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: "Test".to_string(),
            phone: None,
            role,
            email_verified: true,
        }
    }

    fn product(qty: i32) -> NewProduct {
        NewProduct {
            name: "Phone".into(),
            description: String::new(),
            category: "phones".into(),
            condition: ProductCondition::Refurbished,
            price_cents: 2_500,
            quantity: qty,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let repo = LocalRepository::new();
        repo.create_user(new_user("a@example.com", Role::Buyer))
            .await
            .unwrap();
        let err = repo
            .create_user(new_user("a@example.com", Role::Seller))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn unhealthy_repository_fails_calls() {
        let repo = LocalRepository::new();
        repo.set_healthy(false);
        assert!(!repo.health_check().await.unwrap());
        let err = repo.find_user_by_id(UserId(1)).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rotation_succeeds_once() {
        let repo = LocalRepository::new();
        let now = Utc::now();
        let user = repo
            .create_user(new_user("r@example.com", Role::Buyer))
            .await
            .unwrap();
        repo.insert_refresh_token(NewRefreshToken {
            user_id: user.id,
            token_hash: "old".into(),
            expires_at: now + Duration::days(1),
        })
        .await
        .unwrap();

        let replacement = |hash: &str| NewRefreshToken {
            user_id: user.id,
            token_hash: hash.into(),
            expires_at: now + Duration::days(1),
        };
        let first = repo
            .rotate_refresh_token("old", replacement("new1"), now)
            .await
            .unwrap();
        let second = repo
            .rotate_refresh_token("old", replacement("new2"), now)
            .await
            .unwrap();

        assert_eq!(first, RotationOutcome::Rotated { user_id: user.id });
        assert_eq!(second, RotationOutcome::Reused { user_id: user.id });
        assert!(repo.find_refresh_token("new2").await.unwrap().is_none());
        let old = repo.find_refresh_token("old").await.unwrap().unwrap();
        assert_eq!(old.replaced_by.as_deref(), Some("new1"));
    }

    #[tokio::test]
    async fn one_time_tokens_are_single_use() {
        let repo = LocalRepository::new();
        let now = Utc::now();
        repo.insert_one_time_token(NewOneTimeToken {
            user_id: UserId(1),
            purpose: TokenPurpose::PasswordReset,
            token_hash: "t".into(),
            expires_at: now + Duration::hours(1),
        })
        .await
        .unwrap();

        let wrong_purpose = repo
            .consume_one_time_token("t", TokenPurpose::EmailVerification, now)
            .await
            .unwrap();
        assert!(wrong_purpose.is_none());

        assert!(repo
            .consume_one_time_token("t", TokenPurpose::PasswordReset, now)
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .consume_one_time_token("t", TokenPurpose::PasswordReset, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_checkout_leaves_stock_untouched() {
        let repo = LocalRepository::new();
        let a = repo.create_product(UserId(10), product(5)).await.unwrap();
        let b = repo.create_product(UserId(11), product(1)).await.unwrap();

        let outcome = repo
            .place_orders(
                UserId(1),
                &[
                    CartLine { product_id: a.id, quantity: 2 },
                    CartLine { product_id: b.id, quantity: 2 },
                ],
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CheckoutOutcome::InsufficientStock { .. }));
        assert_eq!(repo.get_product(a.id).await.unwrap().unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn cancelling_an_order_restocks() {
        let repo = LocalRepository::new();
        let p = repo.create_product(UserId(10), product(3)).await.unwrap();
        let outcome = repo
            .place_orders(UserId(1), &[CartLine { product_id: p.id, quantity: 3 }])
            .await
            .unwrap();
        let order = match outcome {
            CheckoutOutcome::Placed(mut orders) => orders.remove(0),
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(repo.get_product(p.id).await.unwrap().unwrap().quantity, 0);

        repo.transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.get_product(p.id).await.unwrap().unwrap().quantity, 3);

        // Second cancel loses the compare-and-set.
        assert!(repo
            .transition_order(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn overflowing_checkout_reserves_nothing() {
        let repo = LocalRepository::new();
        let mut pricey = product(2);
        pricey.price_cents = i64::MAX / 2 + 1;
        let p = repo.create_product(UserId(10), pricey).await.unwrap();

        let outcome = repo
            .place_orders(UserId(1), &[CartLine { product_id: p.id, quantity: 2 }])
            .await
            .unwrap();
        assert_eq!(outcome, CheckoutOutcome::TotalOverflow);
        assert_eq!(repo.get_product(p.id).await.unwrap().unwrap().quantity, 2);
        let (orders, total) = repo.list_orders(&OrderFilter::default(), 0, 10).await.unwrap();
        assert!(orders.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn user_updates_touch_only_their_fields() {
        let repo = LocalRepository::new();
        let user = repo
            .create_user(new_user("f@example.com", Role::Buyer))
            .await
            .unwrap();

        repo.update_user(user.id, UserUpdate::Status(AccountStatus::Suspended))
            .await
            .unwrap()
            .unwrap();
        let renamed = repo
            .update_user(
                user.id,
                UserUpdate::Profile {
                    name: Some("Renamed".into()),
                    phone: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.name, "Renamed");
        assert_eq!(renamed.status, AccountStatus::Suspended);

        let err = repo
            .update_user(UserId(999), UserUpdate::EmailVerified)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn conditional_user_updates_check_state() {
        let repo = LocalRepository::new();
        let user = repo
            .create_user(new_user("k@example.com", Role::Seller))
            .await
            .unwrap();
        let details = KycDetails {
            business_name: "Acme".into(),
            registration_number: "R-1".into(),
            document_url: "https://docs.example.com/r1".into(),
            rejection_reason: None,
        };

        let review = UserUpdate::ReviewKyc {
            approved: true,
            rejection_reason: None,
        };
        assert!(repo.update_user(user.id, review.clone()).await.unwrap().is_none());
        assert!(repo
            .update_user(user.id, UserUpdate::SubmitKyc(details.clone()))
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .update_user(user.id, UserUpdate::SubmitKyc(details))
            .await
            .unwrap()
            .is_none());
        let approved = repo.update_user(user.id, review).await.unwrap().unwrap();
        assert_eq!(approved.kyc_status, KycStatus::Approved);

        repo.update_user(user.id, UserUpdate::MfaSecret("SECRET".into()))
            .await
            .unwrap()
            .unwrap();
        let stale = UserUpdate::EnableMfa {
            secret: "OTHER".into(),
            step: 10,
        };
        assert!(repo.update_user(user.id, stale).await.unwrap().is_none());
        repo.update_user(
            user.id,
            UserUpdate::EnableMfa {
                secret: "SECRET".into(),
                step: 10,
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert!(repo
            .update_user(user.id, UserUpdate::MfaStepUsed(10))
            .await
            .unwrap()
            .is_none());
        let used = repo
            .update_user(user.id, UserUpdate::MfaStepUsed(11))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(used.mfa_last_step, Some(11));
    }

    #[tokio::test]
    async fn window_reports_total() {
        let repo = LocalRepository::new();
        for i in 0..5 {
            repo.record_audit(NewAuditEntry {
                actor_id: UserId(1),
                actor_role: Role::Admin,
                method: "GET".into(),
                path: format!("/p/{}", i),
                status_code: 200,
            })
            .await
            .unwrap();
        }
        let (page, total) = repo.list_audit(1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].path, "/p/3");
    }
}
