//! Router configuration for the HTTP API.
//!
//! Every role group lives under `/api/{role}` and gets the same public
//! `/auth/*` routes plus its own protected routes. Admin protected routes
//! additionally pass through the audit middleware.

use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use super::audit;
use super::extract::{AdminRole, BuyerRole, RepairCenterRole, RoleGuard, SellerRole};
use super::handlers::{self, account, admin, auth, buyer, repair_center, seller};
use super::state::AppState;

/// Create the main application router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration - permissive for development, should be restricted in production
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http().make_span_with(|req: &Request| {
        tracing::info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %Uuid::new_v4(),
        )
    });

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest(&group_prefix::<AdminRole>(), admin_routes(&state))
        .nest(&group_prefix::<BuyerRole>(), buyer_routes())
        .nest(&group_prefix::<SellerRole>(), seller_routes())
        .nest(&group_prefix::<RepairCenterRole>(), repair_center_routes())
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(state.body_limit))
        .layer(CompressionLayer::new())
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// `/api/{segment}` for role group `R`.
fn group_prefix<R: RoleGuard>() -> String {
    format!("/api/{}", R::ROLE.path_segment())
}

/// Unauthenticated `/auth/*` routes for role group `R`.
fn public_auth_routes<R: RoleGuard>() -> Router<AppState> {
    let router = Router::new()
        .route("/auth/login", post(auth::login::<R>))
        .route("/auth/mfa/verify", post(auth::verify_mfa::<R>))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend-verification", post(auth::resend_verification))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password));

    if R::ROLE.can_self_register() {
        router.route("/auth/register", post(auth::register::<R>))
    } else {
        router
    }
}

/// Profile and session routes every signed-in role has.
fn account_routes<R: RoleGuard>() -> Router<AppState> {
    Router::new()
        .route(
            "/profile",
            get(account::get_profile::<R>).put(account::update_profile::<R>),
        )
        .route("/profile/password", post(account::change_password::<R>))
        .route("/auth/logout-all", post(account::logout_all::<R>))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    let protected = account_routes::<AdminRole>()
        .route("/auth/mfa/setup", post(admin::mfa_setup))
        .route("/auth/mfa/enable", post(admin::mfa_enable))
        .route("/auth/mfa/disable", post(admin::mfa_disable))
        .route("/users", get(admin::list_users))
        .route("/users/{id}/status", patch(admin::set_user_status))
        .route("/users/{id}/kyc", post(admin::review_kyc))
        .route("/audit-logs", get(admin::list_audit_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            audit::record_admin_action,
        ));

    public_auth_routes::<AdminRole>().merge(protected)
}

fn buyer_routes() -> Router<AppState> {
    public_auth_routes::<BuyerRole>()
        .merge(account_routes::<BuyerRole>())
        .route("/products", get(buyer::browse_products))
        .route("/products/{id}", get(buyer::get_product))
        .route("/orders", post(buyer::checkout).get(buyer::list_orders))
        .route("/orders/{id}/cancel", post(buyer::cancel_order))
        .route(
            "/repair-requests",
            post(buyer::create_repair_request).get(buyer::list_repair_requests),
        )
        .route("/repair-requests/{id}", get(buyer::get_repair_request))
        .route("/repair-requests/{id}/quotes", get(buyer::list_quotes))
        .route("/repair-requests/{id}/cancel", post(buyer::cancel_repair_request))
        .route("/quotes/{id}/accept", post(buyer::accept_quote))
        .route("/quotes/{id}/reject", post(buyer::reject_quote))
}

fn seller_routes() -> Router<AppState> {
    public_auth_routes::<SellerRole>()
        .merge(account_routes::<SellerRole>())
        .route("/kyc", post(account::submit_kyc::<SellerRole>))
        .route(
            "/products",
            post(seller::create_product).get(seller::list_products),
        )
        .route("/products/bulk", post(seller::bulk_create_products))
        .route("/orders", get(seller::list_orders))
        .route("/orders/{id}/status", patch(seller::update_order_status))
}

fn repair_center_routes() -> Router<AppState> {
    public_auth_routes::<RepairCenterRole>()
        .merge(account_routes::<RepairCenterRole>())
        .route("/kyc", post(account::submit_kyc::<RepairCenterRole>))
        .route("/repair-requests", get(repair_center::list_assigned))
        .route(
            "/repair-requests/{id}/accept",
            post(repair_center::accept_request),
        )
        .route(
            "/repair-requests/{id}/reject",
            post(repair_center::reject_request),
        )
        .route(
            "/repair-requests/{id}/status",
            patch(repair_center::update_status),
        )
        .route(
            "/repair-requests/{id}/complete",
            post(repair_center::complete),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::AppConfig;
    use crate::db::repositories::LocalRepository;
    use crate::db::repository::FullRepository;
    use crate::services::{LogNotifier, SystemClock};

    #[test]
    fn test_router_creation() {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "x".repeat(32);
        let repo = Arc::new(LocalRepository::new()) as Arc<dyn FullRepository>;
        let state = AppState::from_config(
            &config,
            repo,
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
        );
        let _router = create_router(state);
    }
}
