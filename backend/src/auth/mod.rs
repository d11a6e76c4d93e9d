//! Credential primitives: password hashing, signed access tokens, opaque
//! tokens and TOTP codes.
//!
//! Nothing here touches the repository; [`crate::services::auth`] composes
//! these into the login, refresh and MFA flows.

pub mod jwt;
pub mod opaque;
pub mod password;
pub mod totp;

pub use jwt::{Claims, JwtKeys, TokenError, TokenType};
pub use opaque::{generate_token, token_digest};
pub use password::{check_password_policy, hash_password, verify_password, PasswordError};
