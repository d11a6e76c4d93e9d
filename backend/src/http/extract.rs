//! Request extractors: bearer authentication with a per-route-group role
//! guard, and JSON/query/path wrappers that reject into the error envelope.

use std::marker::PhantomData;

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;

use super::error::AppError;
use super::state::AppState;
use crate::models::{Role, User, UserId};
use crate::services::{codes, ServiceError};

/// Compile-time role of a route group.
pub trait RoleGuard: Send + Sync + 'static {
    const ROLE: Role;
}

pub struct BuyerRole;
pub struct SellerRole;
pub struct RepairCenterRole;
pub struct AdminRole;

impl RoleGuard for BuyerRole {
    const ROLE: Role = Role::Buyer;
}
impl RoleGuard for SellerRole {
    const ROLE: Role = Role::Seller;
}
impl RoleGuard for RepairCenterRole {
    const ROLE: Role = Role::RepairCenter;
}
impl RoleGuard for AdminRole {
    const ROLE: Role = Role::Admin;
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Resolve the bearer of a request to an active account.
pub async fn authenticate(headers: &HeaderMap, state: &AppState) -> Result<User, ServiceError> {
    let token = bearer_token(headers).ok_or_else(|| {
        ServiceError::unauthorized(codes::UNAUTHORIZED, "missing bearer token")
    })?;
    state.services.auth.authenticate(token).await
}

/// An authenticated caller whose role matches the route group `R`.
pub struct Authed<R: RoleGuard> {
    pub user: User,
    _role: PhantomData<fn() -> R>,
}

impl<R: RoleGuard> Authed<R> {
    pub fn id(&self) -> UserId {
        self.user.id
    }
}

pub type BuyerUser = Authed<BuyerRole>;
pub type SellerUser = Authed<SellerRole>;
pub type RepairCenterUser = Authed<RepairCenterRole>;
pub type AdminUser = Authed<AdminRole>;

impl<R: RoleGuard> FromRequestParts<AppState> for Authed<R> {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        // Middleware that already authenticated the request leaves the user here.
        let user = match parts.extensions.get::<User>() {
            Some(user) => user.clone(),
            None => authenticate(&parts.headers, state).await?,
        };
        if user.role != R::ROLE {
            return Err(ServiceError::forbidden(
                codes::FORBIDDEN,
                "this account cannot access these routes",
            )
            .into());
        }
        Ok(Self {
            user,
            _role: PhantomData,
        })
    }
}

/// `Json<T>` whose rejection is a 400 `INVALID_REQUEST` envelope.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
