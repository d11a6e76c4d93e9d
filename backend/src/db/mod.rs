//! Persistence layer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Service Layer (crate::services) - Business Logic       │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Repository Traits (repository/) - Abstract Interface   │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴──────────────────────┐
//!     │  LocalRepository   PostgresRepository │
//!     │   (in-memory)       (diesel + r2d2)   │
//!     └───────────────────────────────────────┘
//! ```
//!
//! Services hold an `Arc<dyn FullRepository>` and never name a backend;
//! [`RepositoryFactory`] selects one from configuration.

#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod repositories;
pub mod repository;

#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::{PoolStats, PostgresConfig};
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}

pub use factory::{RepositoryFactory, RepositoryType};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{
    AuditRepository, CatalogRepository, CheckoutOutcome, ErrorContext, FullRepository,
    OrderFilter, RepairRepository, RepositoryError, RepositoryResult, TokenRepository,
    UserRepository,
};
