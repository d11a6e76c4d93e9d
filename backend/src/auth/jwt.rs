//! HS256 access tokens.
//!
//! Expiry is checked here against the caller's clock rather than inside
//! `jsonwebtoken`, so tests can pin time and the boundary is exact: a token
//! is valid while `now < exp`.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::models::{Role, UserId};

crate::define_string_enum!(
    /// What a signed token may be used for.
    TokenType {
        /// Bearer credential for API calls.
        Access => "access",
        /// Proof that the password step of an MFA login succeeded.
        MfaChallenge => "mfa",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub typ: TokenType,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<UserId, TokenError> {
        self.sub.parse().map_err(|_| TokenError::Invalid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Signing material plus the validation rules derived from it.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    validation: Validation,
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtKeys")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtKeys {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[issuer.as_str()]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer,
            validation,
        }
    }

    /// Sign a token for `user` that expires `ttl` after `now`.
    pub fn issue(
        &self,
        user: UserId,
        role: Role,
        typ: TokenType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), TokenError> {
        let expires_at = now + ttl;
        let claims = Claims {
            sub: user.to_string(),
            role,
            typ,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, expires_at))
    }

    /// Check signature, issuer, token type and expiry.
    pub fn verify(
        &self,
        token: &str,
        expected: TokenType,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenError::Invalid)?;
        let claims = data.claims;
        if claims.typ != expected {
            return Err(TokenError::Invalid);
        }
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn keys() -> JwtKeys {
        JwtKeys::new(b"0123456789abcdef0123456789abcdef", "test-issuer")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn issued_token_verifies() {
        let keys = keys();
        let (token, exp) = keys
            .issue(UserId(5), Role::Seller, TokenType::Access, t0(), Duration::minutes(15))
            .unwrap();
        assert_eq!(exp, t0() + Duration::minutes(15));

        let claims = keys.verify(&token, TokenType::Access, t0()).unwrap();
        assert_eq!(claims.user_id().unwrap(), UserId(5));
        assert_eq!(claims.role, Role::Seller);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let keys = keys();
        let ttl = Duration::seconds(900);
        let (token, _) = keys
            .issue(UserId(1), Role::Buyer, TokenType::Access, t0(), ttl)
            .unwrap();

        let last_valid = t0() + ttl - Duration::seconds(1);
        assert!(keys.verify(&token, TokenType::Access, last_valid).is_ok());
        assert_eq!(
            keys.verify(&token, TokenType::Access, t0() + ttl),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn token_type_must_match() {
        let keys = keys();
        let (token, _) = keys
            .issue(UserId(1), Role::Admin, TokenType::MfaChallenge, t0(), Duration::minutes(5))
            .unwrap();
        assert_eq!(
            keys.verify(&token, TokenType::Access, t0()),
            Err(TokenError::Invalid)
        );
        assert!(keys.verify(&token, TokenType::MfaChallenge, t0()).is_ok());
    }

    #[test]
    fn foreign_signature_or_issuer_is_rejected() {
        let (token, _) = keys()
            .issue(UserId(1), Role::Buyer, TokenType::Access, t0(), Duration::minutes(5))
            .unwrap();

        let other_secret = JwtKeys::new(b"ffffffffffffffffffffffffffffffff", "test-issuer");
        assert_eq!(
            other_secret.verify(&token, TokenType::Access, t0()),
            Err(TokenError::Invalid)
        );

        let other_issuer = JwtKeys::new(b"0123456789abcdef0123456789abcdef", "someone-else");
        assert_eq!(
            other_issuer.verify(&token, TokenType::Access, t0()),
            Err(TokenError::Invalid)
        );

        assert_eq!(
            keys().verify("not.a.jwt", TokenType::Access, t0()),
            Err(TokenError::Invalid)
        );
    }
}
