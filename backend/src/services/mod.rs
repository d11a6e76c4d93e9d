//! Service layer for business rules and orchestration.
//!
//! Services sit between the HTTP handlers and the repository. They own every
//! rule the marketplace enforces (credential checks, KYC gates, status
//! tables, stock reservation) and report failures as [`ServiceError`]s with
//! stable codes.

pub mod accounts;
pub mod auth;
pub mod catalog;
pub mod clock;
pub mod error;
pub mod notifier;
pub mod pagination;
pub mod repair;

use std::sync::Arc;

use crate::config::AuthSettings;
use crate::db::repository::FullRepository;

pub use accounts::AccountService;
pub use auth::{AuthService, LoginOutcome, Session};
pub use catalog::CatalogService;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{codes, ServiceError, ServiceResult};
pub use notifier::{LogNotifier, MemoryNotifier, Notifier};
pub use pagination::{Page, PageRequest, Paginated};
pub use repair::RepairService;

/// All services wired to one repository, clock and notifier.
#[derive(Clone)]
pub struct Services {
    pub auth: AuthService,
    pub accounts: AccountService,
    pub catalog: CatalogService,
    pub repair: RepairService,
}

impl Services {
    pub fn new(
        repo: Arc<dyn FullRepository>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        auth: AuthSettings,
    ) -> Self {
        Self {
            auth: AuthService::new(repo.clone(), clock.clone(), notifier, auth),
            accounts: AccountService::new(repo.clone(), clock.clone()),
            catalog: CatalogService::new(repo.clone()),
            repair: RepairService::new(repo, clock),
        }
    }
}
