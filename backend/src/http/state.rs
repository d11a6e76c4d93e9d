//! Application state for the HTTP server.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::repository::FullRepository;
use crate::services::{Clock, Notifier, Services};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository instance, used directly only for health and audit
    pub repository: Arc<dyn FullRepository>,
    pub services: Services,
    /// Maximum accepted request body, in bytes
    pub body_limit: usize,
}

impl AppState {
    pub fn new(repository: Arc<dyn FullRepository>, services: Services, body_limit: usize) -> Self {
        Self {
            repository,
            services,
            body_limit,
        }
    }

    /// Wire services for `config` on top of `repository`.
    pub fn from_config(
        config: &AppConfig,
        repository: Arc<dyn FullRepository>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let services = Services::new(repository.clone(), clock, notifier, config.auth.clone());
        Self::new(repository, services, config.server.body_limit_bytes)
    }
}
