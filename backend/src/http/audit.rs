//! Audit trail middleware for the admin route group.
//!
//! Authenticates the caller once, hands the account to the handler through
//! request extensions, and after the handler runs stores who did what and
//! with which outcome. Audit storage failures are logged and never change
//! the response.

use axum::{
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::extract::authenticate;
use super::state::AppState;
use crate::db::repository::AuditRepository;
use crate::models::{NewAuditEntry, Role};

pub async fn record_admin_action(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    // Unauthenticated and non-admin calls are rejected by the handler's
    // extractor; only admin actors are recorded.
    let actor = match authenticate(req.headers(), &state).await {
        Ok(user) => {
            req.extensions_mut().insert(user.clone());
            (user.role == Role::Admin).then_some(user)
        }
        Err(e) => {
            debug!(code = e.code(), "admin request without valid credentials");
            None
        }
    };

    let response = next.run(req).await;

    if let Some(user) = actor {
        let entry = NewAuditEntry {
            actor_id: user.id,
            actor_role: user.role,
            method,
            path,
            status_code: response.status().as_u16(),
        };
        if let Err(e) = state.repository.record_audit(entry).await {
            warn!(error = %e, actor_id = %user.id, "failed to write audit entry");
        }
    }
    response
}
