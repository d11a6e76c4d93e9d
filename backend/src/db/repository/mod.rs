//! Repository trait definitions for database operations.
//!
//! Responsibilities are split across focused traits so each backend can be
//! implemented and tested one concern at a time.
//!
//! - [`error`]: Error types for repository operations
//! - [`users`]: Accounts, KYC and MFA state
//! - [`tokens`]: Refresh tokens and single-use verification/reset tokens
//! - [`catalog`]: Products, orders and stock reservation
//! - [`repair`]: Repair requests and quotes
//! - [`audit`]: Admin audit trail
//!
//! Operations that touch more than one row (token rotation, checkout, quote
//! resolution) are single trait methods so each backend can make them atomic.

pub mod audit;
pub mod catalog;
pub mod error;
pub mod repair;
pub mod tokens;
pub mod users;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};

pub use audit::AuditRepository;
pub use catalog::{CatalogRepository, CheckoutOutcome, OrderFilter};
pub use repair::RepairRepository;
pub use tokens::TokenRepository;
pub use users::{UserRepository, UserUpdate};

/// Composite trait bound for a complete repository implementation.
///
/// Automatically implemented for any type that implements every repository
/// trait; services and the HTTP state hold an `Arc<dyn FullRepository>`.
pub trait FullRepository:
    UserRepository + TokenRepository + CatalogRepository + RepairRepository + AuditRepository
{
}

impl<T> FullRepository for T where
    T: UserRepository + TokenRepository + CatalogRepository + RepairRepository + AuditRepository
{
}
