//! # E-Waste Marketplace Backend
//!
//! REST backend for a marketplace where buyers purchase refurbished
//! electronics from verified sellers and send broken devices to verified
//! repair centers.
//!
//! ## Features
//!
//! - **Accounts**: Registration per role, email verification, password reset
//!   and admin MFA
//! - **Sessions**: Short-lived signed access tokens with rotating refresh tokens
//! - **Catalog**: Seller listings, bulk upload and atomic multi-seller checkout
//! - **Repairs**: Quote negotiation and a guarded repair status workflow
//! - **Moderation**: Business verification review, suspensions and an audit log
//!
//! ## Architecture
//!
//! - [`models`]: Domain types shared by every layer
//! - [`auth`]: Token, password and one-time-code primitives
//! - [`db`]: Repository traits with in-memory and PostgreSQL backends
//! - [`services`]: Business rules on top of the repository
//! - [`http`]: Axum router, extractors and handlers
//! - [`config`]: TOML plus environment configuration

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod auth;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;
