//! Postgres repository implementation using Diesel.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures
//! - Connection health monitoring
//! - Automatic migration execution
//!
//! Operations that touch more than one row (refresh rotation, checkout,
//! order and repair cancellation, quote issue and resolution) run inside a
//! single transaction and lock the rows they read with `SELECT ... FOR UPDATE`.
//!
//! ## Configuration
//!
//! See [`crate::config`]; the `PG_*` environment variables map onto
//! [`PostgresConfig`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::sql_types::Text;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task;

use crate::db::repository::*;
use crate::models::*;

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

diesel::define_sql_function!(fn lower(x: Text) -> Text);

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    pub max_pool_size: u32,
    /// Minimum number of connections in the pool
    pub min_pool_size: u32,
    /// Connection timeout in seconds
    pub connection_timeout_sec: u64,
    /// Idle connection timeout in seconds
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

impl PostgresConfig {
    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Pool health statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of connections currently in use
    pub connections_in_use: u32,
    /// Number of idle connections
    pub idle_connections: u32,
    /// Total number of connections in the pool
    pub total_connections: u32,
    /// Maximum pool size
    pub max_size: u32,
    /// Total successful queries executed
    pub total_queries: u64,
    /// Total failed queries
    pub failed_queries: u64,
    /// Total retried operations
    pub retried_operations: u64,
}

/// Diesel-backed repository for Postgres.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
    // Metrics counters
    total_queries: Arc<AtomicU64>,
    failed_queries: Arc<AtomicU64>,
    retried_operations: Arc<AtomicU64>,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self {
            pool,
            config,
            total_queries: Arc::new(AtomicU64::new(0)),
            failed_queries: Arc::new(AtomicU64::new(0)),
            retried_operations: Arc::new(AtomicU64::new(0)),
        })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;
        Ok(())
    }

    /// Execute a database operation with automatic retry for transient failures.
    ///
    /// The closure may run more than once, so it must be safe to repeat: every
    /// multi-statement operation wraps itself in a transaction.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;
        let total_queries = self.total_queries.clone();
        let failed_queries = self.failed_queries.clone();
        let retried_operations = self.retried_operations.clone();

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    retried_operations.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                };

                total_queries.fetch_add(1, Ordering::Relaxed);
                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        tracing::warn!(attempt = attempt + 1, error = %e, "retrying database operation");
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            failed_queries.fetch_add(1, Ordering::Relaxed);
            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Get pool health statistics.
    pub fn get_pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections_in_use: state.connections - state.idle_connections,
            idle_connections: state.idle_connections,
            total_connections: state.connections,
            max_size: self.config.max_pool_size,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            retried_operations: self.retried_operations.load(Ordering::Relaxed),
        }
    }
}

fn sql_offset(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn user_query(filter: &UserFilter) -> users::BoxedQuery<'static, Pg> {
    let mut query = users::table.into_boxed();
    if let Some(role) = filter.role {
        query = query.filter(users::role.eq(role.as_str()));
    }
    if let Some(status) = filter.status {
        query = query.filter(users::status.eq(status.as_str()));
    }
    if let Some(kyc_status) = filter.kyc_status {
        query = query.filter(users::kyc_status.eq(kyc_status.as_str()));
    }
    query
}

fn product_query(filter: &ProductFilter) -> products::BoxedQuery<'static, Pg> {
    let mut query = products::table.into_boxed();
    if let Some(seller_id) = filter.seller_id {
        query = query.filter(products::seller_id.eq(seller_id.0));
    }
    if let Some(category) = filter.category.clone() {
        query = query.filter(lower(products::category).eq(category.to_lowercase()));
    }
    if filter.in_stock_only {
        query = query.filter(products::quantity.gt(0));
    }
    query
}

fn order_query(filter: &OrderFilter) -> orders::BoxedQuery<'static, Pg> {
    let mut query = orders::table.into_boxed();
    if let Some(buyer_id) = filter.buyer_id {
        query = query.filter(orders::buyer_id.eq(buyer_id.0));
    }
    if let Some(seller_id) = filter.seller_id {
        query = query.filter(orders::seller_id.eq(seller_id.0));
    }
    if let Some(status) = filter.status {
        query = query.filter(orders::status.eq(status.as_str()));
    }
    query
}

fn repair_query(filter: &RepairFilter) -> repair_requests::BoxedQuery<'static, Pg> {
    let mut query = repair_requests::table.into_boxed();
    if let Some(buyer_id) = filter.buyer_id {
        query = query.filter(repair_requests::buyer_id.eq(buyer_id.0));
    }
    if let Some(center_id) = filter.repair_center_id {
        query = query.filter(repair_requests::repair_center_id.eq(center_id.0));
    }
    if let Some(status) = filter.status {
        query = query.filter(repair_requests::status.eq(status.as_str()));
    }
    query
}

/// Attach line items to a batch of order rows, keeping row order.
fn assemble_orders(conn: &mut PgConnection, rows: Vec<OrderRow>) -> RepositoryResult<Vec<Order>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let item_rows: Vec<OrderItemRow> = order_items::table
        .filter(order_items::order_id.eq_any(&ids))
        .order(order_items::id.asc())
        .select(OrderItemRow::as_select())
        .load(conn)?;

    let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
    for row in item_rows {
        items.entry(row.order_id).or_default().push(row.into());
    }
    rows.into_iter()
        .map(|row| {
            let order_items = items.remove(&row.id).unwrap_or_default();
            row.into_order(order_items)
        })
        .collect()
}

#[async_trait]
impl UserRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| sql_query("SELECT 1").execute(conn).map(|_| true).map_err(Into::into))
            .await
    }

    async fn create_user(&self, user: NewUser) -> RepositoryResult<User> {
        let row = NewUserRow::from(user);
        self.with_conn(move |conn| {
            let inserted: UserRow = diesel::insert_into(users::table)
                .values(&row)
                .returning(UserRow::as_returning())
                .get_result(conn)
                .map_err(|e| RepositoryError::from(e).with_operation("create_user"))?;
            User::try_from(inserted)
        })
        .await
    }

    async fn find_user_by_id(&self, id: UserId) -> RepositoryResult<Option<User>> {
        self.with_conn(move |conn| {
            users::table
                .find(id.0)
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            users::table
                .filter(users::email.eq(&email))
                .select(UserRow::as_select())
                .first(conn)
                .optional()?
                .map(User::try_from)
                .transpose()
        })
        .await
    }

    async fn update_user(&self, id: UserId, update: UserUpdate) -> RepositoryResult<Option<User>> {
        self.with_conn(move |conn| {
            let now = Utc::now();
            let updated: Option<UserRow> = match update {
                UserUpdate::Profile { name, phone } => diesel::update(users::table.find(id.0))
                    .set(&ProfileChangeset {
                        name,
                        phone,
                        updated_at: now,
                    })
                    .returning(UserRow::as_returning())
                    .get_result(conn)
                    .optional()?,
                UserUpdate::Status(status) => diesel::update(users::table.find(id.0))
                    .set((users::status.eq(status.as_str()), users::updated_at.eq(now)))
                    .returning(UserRow::as_returning())
                    .get_result(conn)
                    .optional()?,
                UserUpdate::EmailVerified => diesel::update(users::table.find(id.0))
                    .set((users::email_verified.eq(true), users::updated_at.eq(now)))
                    .returning(UserRow::as_returning())
                    .get_result(conn)
                    .optional()?,
                UserUpdate::PasswordHash(hash) => diesel::update(users::table.find(id.0))
                    .set((users::password_hash.eq(hash), users::updated_at.eq(now)))
                    .returning(UserRow::as_returning())
                    .get_result(conn)
                    .optional()?,
                UserUpdate::SubmitKyc(details) => diesel::update(
                    users::table.find(id.0).filter(users::kyc_status.eq_any(vec![
                        KycStatus::NotSubmitted.as_str(),
                        KycStatus::Rejected.as_str(),
                    ])),
                )
                .set(&KycSubmissionChangeset::new(details, now))
                .returning(UserRow::as_returning())
                .get_result(conn)
                .optional()?,
                UserUpdate::ReviewKyc {
                    approved,
                    rejection_reason,
                } => {
                    let status = if approved {
                        KycStatus::Approved
                    } else {
                        KycStatus::Rejected
                    };
                    diesel::update(
                        users::table
                            .find(id.0)
                            .filter(users::kyc_status.eq(KycStatus::Pending.as_str())),
                    )
                    .set((
                        users::kyc_status.eq(status.as_str()),
                        users::kyc_rejection_reason.eq(rejection_reason),
                        users::updated_at.eq(now),
                    ))
                    .returning(UserRow::as_returning())
                    .get_result(conn)
                    .optional()?
                }
                UserUpdate::MfaSecret(secret) => {
                    diesel::update(users::table.find(id.0).filter(users::mfa_enabled.eq(false)))
                        .set((
                            users::mfa_secret.eq(Some(secret)),
                            users::mfa_last_step.eq(None::<i64>),
                            users::updated_at.eq(now),
                        ))
                        .returning(UserRow::as_returning())
                        .get_result(conn)
                        .optional()?
                }
                UserUpdate::EnableMfa { secret, step } => diesel::update(
                    users::table
                        .find(id.0)
                        .filter(users::mfa_enabled.eq(false))
                        .filter(users::mfa_secret.eq(secret)),
                )
                .set((
                    users::mfa_enabled.eq(true),
                    users::mfa_last_step.eq(Some(step)),
                    users::updated_at.eq(now),
                ))
                .returning(UserRow::as_returning())
                .get_result(conn)
                .optional()?,
                UserUpdate::DisableMfa => {
                    diesel::update(users::table.find(id.0).filter(users::mfa_enabled.eq(true)))
                        .set((
                            users::mfa_enabled.eq(false),
                            users::mfa_secret.eq(None::<String>),
                            users::mfa_last_step.eq(None::<i64>),
                            users::updated_at.eq(now),
                        ))
                        .returning(UserRow::as_returning())
                        .get_result(conn)
                        .optional()?
                }
                UserUpdate::MfaStepUsed(step) => diesel::update(
                    users::table
                        .find(id.0)
                        .filter(users::mfa_enabled.eq(true))
                        .filter(
                            users::mfa_last_step
                                .is_null()
                                .or(users::mfa_last_step.lt(step)),
                        ),
                )
                .set((
                    users::mfa_last_step.eq(Some(step)),
                    users::updated_at.eq(now),
                ))
                .returning(UserRow::as_returning())
                .get_result(conn)
                .optional()?,
            };

            if let Some(row) = updated {
                return User::try_from(row).map(Some);
            }
            let exists: bool =
                diesel::select(diesel::dsl::exists(users::table.find(id.0))).get_result(conn)?;
            if exists {
                Ok(None)
            } else {
                Err(RepositoryError::not_found_with_context(
                    "user not found",
                    ErrorContext::new("update_user")
                        .with_entity("user")
                        .with_entity_id(id),
                ))
            }
        })
        .await
    }

    async fn list_users(
        &self,
        filter: &UserFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<User>, u64)> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let total: i64 = user_query(&filter).count().get_result(conn)?;
            let rows: Vec<UserRow> = user_query(&filter)
                .order(users::id.asc())
                .offset(sql_offset(offset))
                .limit(sql_offset(limit))
                .select(UserRow::as_select())
                .load(conn)?;
            Ok((convert_rows(rows)?, total as u64))
        })
        .await
    }
}

#[async_trait]
impl TokenRepository for PostgresRepository {
    async fn insert_refresh_token(
        &self,
        token: NewRefreshToken,
    ) -> RepositoryResult<RefreshTokenRecord> {
        let row = NewRefreshTokenRow::from(token);
        self.with_conn(move |conn| {
            let inserted: RefreshTokenRow = diesel::insert_into(refresh_tokens::table)
                .values(&row)
                .returning(RefreshTokenRow::as_returning())
                .get_result(conn)?;
            Ok(inserted.into())
        })
        .await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> RepositoryResult<Option<RefreshTokenRecord>> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            let row: Option<RefreshTokenRow> = refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(&token_hash))
                .select(RefreshTokenRow::as_select())
                .first(conn)
                .optional()?;
            Ok(row.map(Into::into))
        })
        .await
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        replacement: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> RepositoryResult<RotationOutcome> {
        let token_hash = token_hash.to_string();
        let replacement = NewRefreshTokenRow::from(replacement);
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|tx| {
                let current: Option<RefreshTokenRow> = refresh_tokens::table
                    .filter(refresh_tokens::token_hash.eq(&token_hash))
                    .select(RefreshTokenRow::as_select())
                    .for_update()
                    .first(tx)
                    .optional()?;
                let Some(current) = current else {
                    return Ok(RotationOutcome::NotFound);
                };
                let user_id = UserId(current.user_id);
                if now >= current.expires_at {
                    return Ok(RotationOutcome::Expired { user_id });
                }
                if current.revoked_at.is_some() {
                    return Ok(RotationOutcome::Reused { user_id });
                }

                let revoked = diesel::update(
                    refresh_tokens::table
                        .filter(refresh_tokens::id.eq(current.id))
                        .filter(refresh_tokens::revoked_at.is_null()),
                )
                .set((
                    refresh_tokens::revoked_at.eq(Some(now)),
                    refresh_tokens::replaced_by.eq(Some(replacement.token_hash.clone())),
                ))
                .execute(tx)?;
                if revoked == 0 {
                    return Ok(RotationOutcome::Reused { user_id });
                }

                diesel::insert_into(refresh_tokens::table)
                    .values(&replacement)
                    .execute(tx)?;
                Ok(RotationOutcome::Rotated { user_id })
            })
        })
        .await
    }

    async fn revoke_refresh_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            let updated = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::token_hash.eq(&token_hash))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set(refresh_tokens::revoked_at.eq(Some(now)))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    async fn revoke_all_refresh_tokens(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        self.with_conn(move |conn| {
            diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::user_id.eq(user_id.0))
                    .filter(refresh_tokens::revoked_at.is_null()),
            )
            .set(refresh_tokens::revoked_at.eq(Some(now)))
            .execute(conn)
            .map_err(Into::into)
        })
        .await
    }

    async fn insert_one_time_token(
        &self,
        token: NewOneTimeToken,
    ) -> RepositoryResult<OneTimeTokenRecord> {
        let row = NewOneTimeTokenRow::from(token);
        self.with_conn(move |conn| {
            let inserted: OneTimeTokenRow = diesel::insert_into(one_time_tokens::table)
                .values(&row)
                .returning(OneTimeTokenRow::as_returning())
                .get_result(conn)?;
            OneTimeTokenRecord::try_from(inserted)
        })
        .await
    }

    async fn consume_one_time_token(
        &self,
        token_hash: &str,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<OneTimeTokenRecord>> {
        let token_hash = token_hash.to_string();
        self.with_conn(move |conn| {
            let consumed: Option<OneTimeTokenRow> = diesel::update(
                one_time_tokens::table
                    .filter(one_time_tokens::token_hash.eq(&token_hash))
                    .filter(one_time_tokens::purpose.eq(purpose.as_str()))
                    .filter(one_time_tokens::used_at.is_null())
                    .filter(one_time_tokens::expires_at.gt(now)),
            )
            .set(one_time_tokens::used_at.eq(Some(now)))
            .returning(OneTimeTokenRow::as_returning())
            .get_result(conn)
            .optional()?;
            consumed.map(OneTimeTokenRecord::try_from).transpose()
        })
        .await
    }

    async fn invalidate_one_time_tokens(
        &self,
        user_id: UserId,
        purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        self.with_conn(move |conn| {
            diesel::update(
                one_time_tokens::table
                    .filter(one_time_tokens::user_id.eq(user_id.0))
                    .filter(one_time_tokens::purpose.eq(purpose.as_str()))
                    .filter(one_time_tokens::used_at.is_null()),
            )
            .set(one_time_tokens::used_at.eq(Some(now)))
            .execute(conn)
            .map_err(Into::into)
        })
        .await
    }
}

#[async_trait]
impl CatalogRepository for PostgresRepository {
    async fn create_product(
        &self,
        seller_id: UserId,
        product: NewProduct,
    ) -> RepositoryResult<Product> {
        let row = NewProductRow::new(seller_id, product);
        self.with_conn(move |conn| {
            let inserted: ProductRow = diesel::insert_into(products::table)
                .values(&row)
                .returning(ProductRow::as_returning())
                .get_result(conn)?;
            Product::try_from(inserted)
        })
        .await
    }

    async fn get_product(&self, id: ProductId) -> RepositoryResult<Option<Product>> {
        self.with_conn(move |conn| {
            products::table
                .find(id.0)
                .select(ProductRow::as_select())
                .first(conn)
                .optional()?
                .map(Product::try_from)
                .transpose()
        })
        .await
    }

    async fn list_products(
        &self,
        filter: &ProductFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<Product>, u64)> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let total: i64 = product_query(&filter).count().get_result(conn)?;
            let rows: Vec<ProductRow> = product_query(&filter)
                .order(products::id.desc())
                .offset(sql_offset(offset))
                .limit(sql_offset(limit))
                .select(ProductRow::as_select())
                .load(conn)?;
            Ok((convert_rows(rows)?, total as u64))
        })
        .await
    }

    async fn place_orders(
        &self,
        buyer_id: UserId,
        lines: &[CartLine],
    ) -> RepositoryResult<CheckoutOutcome> {
        let lines = lines.to_vec();
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|tx| {
                let ids: Vec<i64> = lines.iter().map(|l| l.product_id.0).collect();
                // Lock in id order so concurrent checkouts cannot deadlock.
                let locked: Vec<ProductRow> = products::table
                    .filter(products::id.eq_any(&ids))
                    .order(products::id.asc())
                    .select(ProductRow::as_select())
                    .for_update()
                    .load(tx)?;
                let stock: HashMap<i64, ProductRow> =
                    locked.into_iter().map(|p| (p.id, p)).collect();

                let mut by_seller: BTreeMap<i64, Vec<OrderItem>> = BTreeMap::new();
                for line in &lines {
                    let Some(product) = stock.get(&line.product_id.0) else {
                        return Ok(CheckoutOutcome::ProductNotFound(line.product_id));
                    };
                    if product.quantity < line.quantity {
                        return Ok(CheckoutOutcome::InsufficientStock {
                            product_id: line.product_id,
                            available: product.quantity,
                            requested: line.quantity,
                        });
                    }
                    by_seller.entry(product.seller_id).or_default().push(OrderItem {
                        product_id: line.product_id,
                        name: product.name.clone(),
                        unit_price_cents: product.price_cents,
                        quantity: line.quantity,
                    });
                }

                let mut totals = Vec::with_capacity(by_seller.len());
                let mut grand_total = 0i64;
                for items in by_seller.values() {
                    let Some(total) = items_total_cents(items) else {
                        return Ok(CheckoutOutcome::TotalOverflow);
                    };
                    let Some(sum) = grand_total.checked_add(total) else {
                        return Ok(CheckoutOutcome::TotalOverflow);
                    };
                    grand_total = sum;
                    totals.push(total);
                }

                for line in &lines {
                    let updated = diesel::update(
                        products::table
                            .filter(products::id.eq(line.product_id.0))
                            .filter(products::quantity.ge(line.quantity)),
                    )
                    .set(products::quantity.eq(products::quantity - line.quantity))
                    .execute(tx)?;
                    if updated == 0 {
                        return Err(RepositoryError::transaction(format!(
                            "stock for product {} changed during checkout",
                            line.product_id
                        )));
                    }
                }

                let mut placed = Vec::with_capacity(by_seller.len());
                for ((seller_id, items), total_cents) in by_seller.into_iter().zip(totals) {
                    let order: OrderRow = diesel::insert_into(orders::table)
                        .values(&NewOrderRow {
                            buyer_id: buyer_id.0,
                            seller_id,
                            total_cents,
                            status: OrderStatus::Pending.as_str().to_string(),
                        })
                        .returning(OrderRow::as_returning())
                        .get_result(tx)?;
                    let item_rows: Vec<NewOrderItemRow> = items
                        .iter()
                        .map(|item| NewOrderItemRow {
                            order_id: order.id,
                            product_id: item.product_id.0,
                            name: item.name.clone(),
                            unit_price_cents: item.unit_price_cents,
                            quantity: item.quantity,
                        })
                        .collect();
                    diesel::insert_into(order_items::table)
                        .values(&item_rows)
                        .execute(tx)?;
                    placed.push(order.into_order(items)?);
                }
                Ok(CheckoutOutcome::Placed(placed))
            })
        })
        .await
    }

    async fn get_order(&self, id: OrderId) -> RepositoryResult<Option<Order>> {
        self.with_conn(move |conn| {
            let row: Option<OrderRow> = orders::table
                .find(id.0)
                .select(OrderRow::as_select())
                .first(conn)
                .optional()?;
            match row {
                Some(row) => Ok(assemble_orders(conn, vec![row])?.pop()),
                None => Ok(None),
            }
        })
        .await
    }

    async fn list_orders(
        &self,
        filter: &OrderFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<Order>, u64)> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let total: i64 = order_query(&filter).count().get_result(conn)?;
            let rows: Vec<OrderRow> = order_query(&filter)
                .order(orders::id.desc())
                .offset(sql_offset(offset))
                .limit(sql_offset(limit))
                .select(OrderRow::as_select())
                .load(conn)?;
            Ok((assemble_orders(conn, rows)?, total as u64))
        })
        .await
    }

    async fn transition_order(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepositoryResult<Option<Order>> {
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|tx| {
                let updated: Option<OrderRow> = diesel::update(
                    orders::table
                        .filter(orders::id.eq(id.0))
                        .filter(orders::status.eq(from.as_str())),
                )
                .set((
                    orders::status.eq(to.as_str()),
                    orders::updated_at.eq(Utc::now()),
                ))
                .returning(OrderRow::as_returning())
                .get_result(tx)
                .optional()?;
                let Some(row) = updated else {
                    return Ok(None);
                };

                let order = assemble_orders(tx, vec![row])?.pop();
                if to == OrderStatus::Cancelled {
                    if let Some(order) = &order {
                        for item in &order.items {
                            diesel::update(products::table.find(item.product_id.0))
                                .set(products::quantity.eq(products::quantity + item.quantity))
                                .execute(tx)?;
                        }
                    }
                }
                Ok(order)
            })
        })
        .await
    }
}

#[async_trait]
impl RepairRepository for PostgresRepository {
    async fn create_repair_request(
        &self,
        buyer_id: UserId,
        request: NewRepairRequest,
    ) -> RepositoryResult<RepairRequest> {
        let row = NewRepairRequestRow::new(buyer_id, request);
        self.with_conn(move |conn| {
            let inserted: RepairRequestRow = diesel::insert_into(repair_requests::table)
                .values(&row)
                .returning(RepairRequestRow::as_returning())
                .get_result(conn)?;
            RepairRequest::try_from(inserted)
        })
        .await
    }

    async fn get_repair_request(
        &self,
        id: RepairRequestId,
    ) -> RepositoryResult<Option<RepairRequest>> {
        self.with_conn(move |conn| {
            repair_requests::table
                .find(id.0)
                .select(RepairRequestRow::as_select())
                .first(conn)
                .optional()?
                .map(RepairRequest::try_from)
                .transpose()
        })
        .await
    }

    async fn list_repair_requests(
        &self,
        filter: &RepairFilter,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<RepairRequest>, u64)> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let total: i64 = repair_query(&filter).count().get_result(conn)?;
            let rows: Vec<RepairRequestRow> = repair_query(&filter)
                .order(repair_requests::id.desc())
                .offset(sql_offset(offset))
                .limit(sql_offset(limit))
                .select(RepairRequestRow::as_select())
                .load(conn)?;
            Ok((convert_rows(rows)?, total as u64))
        })
        .await
    }

    async fn transition_repair_request(
        &self,
        id: RepairRequestId,
        from: RepairStatus,
        to: RepairStatus,
        reason: Option<String>,
    ) -> RepositoryResult<Option<RepairRequest>> {
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|tx| {
                let target = repair_requests::table
                    .filter(repair_requests::id.eq(id.0))
                    .filter(repair_requests::status.eq(from.as_str()));
                let now = Utc::now();
                if to != RepairStatus::Cancelled {
                    let updated: Option<RepairRequestRow> = diesel::update(target)
                        .set((
                            repair_requests::status.eq(to.as_str()),
                            repair_requests::updated_at.eq(now),
                        ))
                        .returning(RepairRequestRow::as_returning())
                        .get_result(tx)
                        .optional()?;
                    return updated.map(RepairRequest::try_from).transpose();
                }

                let updated: Option<RepairRequestRow> = diesel::update(target)
                    .set((
                        repair_requests::status.eq(to.as_str()),
                        repair_requests::cancellation_reason.eq(reason.clone()),
                        repair_requests::updated_at.eq(now),
                    ))
                    .returning(RepairRequestRow::as_returning())
                    .get_result(tx)
                    .optional()?;
                let Some(row) = updated else {
                    return Ok(None);
                };
                diesel::update(
                    repair_quotes::table
                        .filter(repair_quotes::request_id.eq(id.0))
                        .filter(repair_quotes::status.eq(QuoteStatus::Pending.as_str())),
                )
                .set(repair_quotes::status.eq(QuoteStatus::Rejected.as_str()))
                .execute(tx)?;
                RepairRequest::try_from(row).map(Some)
            })
        })
        .await
    }

    async fn issue_quote(
        &self,
        request_id: RepairRequestId,
        repair_center_id: UserId,
        terms: QuoteTerms,
        total_cents: i64,
    ) -> RepositoryResult<Option<RepairQuote>> {
        let row = NewRepairQuoteRow {
            request_id: request_id.0,
            repair_center_id: repair_center_id.0,
            labor_cents: terms.labor_cents,
            parts_cents: terms.parts_cents,
            tax_cents: terms.tax_cents,
            total_cents,
            estimated_days: terms.estimated_days,
            notes: terms.notes,
            valid_until: terms.valid_until,
            status: QuoteStatus::Pending.as_str().to_string(),
        };
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|tx| {
                let moved = diesel::update(
                    repair_requests::table
                        .filter(repair_requests::id.eq(request_id.0))
                        .filter(repair_requests::status.eq(RepairStatus::Pending.as_str())),
                )
                .set((
                    repair_requests::status.eq(RepairStatus::Quoted.as_str()),
                    repair_requests::updated_at.eq(Utc::now()),
                ))
                .execute(tx)?;
                if moved == 0 {
                    return Ok(None);
                }

                let inserted: RepairQuoteRow = diesel::insert_into(repair_quotes::table)
                    .values(&row)
                    .returning(RepairQuoteRow::as_returning())
                    .get_result(tx)?;
                RepairQuote::try_from(inserted).map(Some)
            })
        })
        .await
    }

    async fn get_quote(&self, id: QuoteId) -> RepositoryResult<Option<RepairQuote>> {
        self.with_conn(move |conn| {
            repair_quotes::table
                .find(id.0)
                .select(RepairQuoteRow::as_select())
                .first(conn)
                .optional()?
                .map(RepairQuote::try_from)
                .transpose()
        })
        .await
    }

    async fn list_quotes(
        &self,
        request_id: RepairRequestId,
    ) -> RepositoryResult<Vec<RepairQuote>> {
        self.with_conn(move |conn| {
            let rows: Vec<RepairQuoteRow> = repair_quotes::table
                .filter(repair_quotes::request_id.eq(request_id.0))
                .order(repair_quotes::id.desc())
                .select(RepairQuoteRow::as_select())
                .load(conn)?;
            convert_rows(rows)
        })
        .await
    }

    async fn resolve_quote(
        &self,
        quote_id: QuoteId,
        quote_status: QuoteStatus,
        request_from: RepairStatus,
        request_to: RepairStatus,
    ) -> RepositoryResult<Option<(RepairQuote, RepairRequest)>> {
        self.with_conn(move |conn| {
            conn.transaction::<_, RepositoryError, _>(|tx| {
                let pending: Option<RepairQuoteRow> = repair_quotes::table
                    .filter(repair_quotes::id.eq(quote_id.0))
                    .filter(repair_quotes::status.eq(QuoteStatus::Pending.as_str()))
                    .select(RepairQuoteRow::as_select())
                    .for_update()
                    .first(tx)
                    .optional()?;
                let Some(pending) = pending else {
                    return Ok(None);
                };

                let request: Option<RepairRequestRow> = diesel::update(
                    repair_requests::table
                        .filter(repair_requests::id.eq(pending.request_id))
                        .filter(repair_requests::status.eq(request_from.as_str())),
                )
                .set((
                    repair_requests::status.eq(request_to.as_str()),
                    repair_requests::updated_at.eq(Utc::now()),
                ))
                .returning(RepairRequestRow::as_returning())
                .get_result(tx)
                .optional()?;
                let Some(request) = request else {
                    return Ok(None);
                };

                let quote: RepairQuoteRow = diesel::update(repair_quotes::table.find(pending.id))
                    .set(repair_quotes::status.eq(quote_status.as_str()))
                    .returning(RepairQuoteRow::as_returning())
                    .get_result(tx)?;
                Ok(Some((
                    RepairQuote::try_from(quote)?,
                    RepairRequest::try_from(request)?,
                )))
            })
        })
        .await
    }
}

#[async_trait]
impl AuditRepository for PostgresRepository {
    async fn record_audit(&self, entry: NewAuditEntry) -> RepositoryResult<AuditEntry> {
        let row = NewAuditRow::from(entry);
        self.with_conn(move |conn| {
            let inserted: AuditRow = diesel::insert_into(audit_logs::table)
                .values(&row)
                .returning(AuditRow::as_returning())
                .get_result(conn)?;
            AuditEntry::try_from(inserted)
        })
        .await
    }

    async fn list_audit(
        &self,
        offset: u64,
        limit: u64,
    ) -> RepositoryResult<(Vec<AuditEntry>, u64)> {
        self.with_conn(move |conn| {
            let total: i64 = audit_logs::table.count().get_result(conn)?;
            let rows: Vec<AuditRow> = audit_logs::table
                .order(audit_logs::id.desc())
                .offset(sql_offset(offset))
                .limit(sql_offset(limit))
                .select(AuditRow::as_select())
                .load(conn)?;
            Ok((convert_rows(rows)?, total as u64))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = PostgresConfig::with_url("postgres://localhost/ewaste");
        assert_eq!(config.database_url, "postgres://localhost/ewaste");
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.min_pool_size, 1);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 100);
    }

    #[test]
    fn offsets_saturate() {
        assert_eq!(sql_offset(20), 20);
        assert_eq!(sql_offset(u64::MAX), i64::MAX);
    }

    #[test]
    fn kyc_submission_clears_rejection_reason() {
        let now = Utc::now();
        let changes = KycSubmissionChangeset::new(
            KycDetails {
                business_name: "Acme".into(),
                registration_number: "R-1".into(),
                document_url: "https://docs.example.com/r1".into(),
                rejection_reason: Some("blurry".into()),
            },
            now,
        );
        assert_eq!(changes.kyc_status, "pending");
        assert_eq!(changes.kyc_business_name.as_deref(), Some("Acme"));
        assert_eq!(changes.kyc_rejection_reason, None);
    }
}
