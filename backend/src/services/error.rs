//! Business-rule failures, each carrying a stable machine code that the HTTP
//! layer copies into the error envelope.

use crate::db::repository::RepositoryError;

/// Machine-readable error codes shared by every role group.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const WEAK_PASSWORD: &str = "WEAK_PASSWORD";
    pub const EMAIL_IN_USE: &str = "EMAIL_IN_USE";

    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
    pub const INVALID_REFRESH_TOKEN: &str = "INVALID_REFRESH_TOKEN";
    pub const REFRESH_TOKEN_EXPIRED: &str = "REFRESH_TOKEN_EXPIRED";
    pub const REFRESH_TOKEN_REUSED: &str = "REFRESH_TOKEN_REUSED";
    pub const INVALID_VERIFICATION_TOKEN: &str = "INVALID_VERIFICATION_TOKEN";
    pub const INVALID_RESET_TOKEN: &str = "INVALID_RESET_TOKEN";
    pub const INVALID_MFA_CODE: &str = "INVALID_MFA_CODE";

    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const EMAIL_NOT_VERIFIED: &str = "EMAIL_NOT_VERIFIED";
    pub const ACCOUNT_SUSPENDED: &str = "ACCOUNT_SUSPENDED";
    pub const KYC_REQUIRED: &str = "KYC_REQUIRED";
    pub const MFA_NOT_ALLOWED: &str = "MFA_NOT_ALLOWED";

    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const USER_NOT_FOUND: &str = "USER_NOT_FOUND";
    pub const PRODUCT_NOT_FOUND: &str = "PRODUCT_NOT_FOUND";
    pub const ORDER_NOT_FOUND: &str = "ORDER_NOT_FOUND";
    pub const REPAIR_REQUEST_NOT_FOUND: &str = "REPAIR_REQUEST_NOT_FOUND";
    pub const QUOTE_NOT_FOUND: &str = "QUOTE_NOT_FOUND";
    pub const REPAIR_CENTER_NOT_FOUND: &str = "REPAIR_CENTER_NOT_FOUND";

    pub const INVALID_STATUS_TRANSITION: &str = "INVALID_STATUS_TRANSITION";
    pub const QUOTE_EXPIRED: &str = "QUOTE_EXPIRED";
    pub const QUOTE_NOT_PENDING: &str = "QUOTE_NOT_PENDING";
    pub const INSUFFICIENT_STOCK: &str = "INSUFFICIENT_STOCK";
    pub const KYC_NOT_PENDING: &str = "KYC_NOT_PENDING";
    pub const KYC_ALREADY_SUBMITTED: &str = "KYC_ALREADY_SUBMITTED";
    pub const MFA_NOT_SET_UP: &str = "MFA_NOT_SET_UP";
    pub const MFA_ALREADY_ENABLED: &str = "MFA_ALREADY_ENABLED";
    pub const MFA_NOT_ENABLED: &str = "MFA_NOT_ENABLED";
    pub const CANNOT_MODIFY_SELF: &str = "CANNOT_MODIFY_SELF";

    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const SERVICE_UNAVAILABLE: &str = "SERVICE_UNAVAILABLE";
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Input failed validation (400).
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    /// Missing or bad credentials (401).
    #[error("{message}")]
    Unauthorized { code: &'static str, message: String },

    /// Authenticated but not allowed (403).
    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    /// The operation clashes with current state (409).
    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: codes::VALIDATION_ERROR,
            message: message.into(),
        }
    }

    pub fn validation_code(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::Forbidden {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            code,
            message: message.into(),
        }
    }

    /// Storage is unreachable; reported as 503.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Repository(RepositoryError::connection(message))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::conflict(
            codes::INVALID_STATUS_TRANSITION,
            format!("cannot move from {} to {}", from, to),
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. }
            | Self::Unauthorized { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::Conflict { code, .. } => code,
            Self::Repository(e) if e.is_retryable() => codes::SERVICE_UNAVAILABLE,
            Self::Repository(_) | Self::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Text safe to show a client. Storage and internal details stay in logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Repository(e) if e.is_retryable() => {
                "service temporarily unavailable".to_string()
            }
            Self::Repository(_) | Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<crate::auth::TokenError> for ServiceError {
    fn from(err: crate::auth::TokenError) -> Self {
        use crate::auth::TokenError;
        match err {
            TokenError::Expired => Self::unauthorized(codes::TOKEN_EXPIRED, "token expired"),
            TokenError::Invalid => Self::unauthorized(codes::INVALID_TOKEN, "invalid token"),
            TokenError::Signing(message) => Self::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_errors_hide_details() {
        let err = ServiceError::from(RepositoryError::query("relation \"users\" does not exist"));
        assert_eq!(err.code(), codes::INTERNAL_ERROR);
        assert_eq!(err.public_message(), "internal server error");

        let err = ServiceError::from(RepositoryError::connection("pool timed out"));
        assert_eq!(err.code(), codes::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn transition_error_names_both_statuses() {
        let err = ServiceError::invalid_transition("pending", "completed");
        assert_eq!(err.code(), codes::INVALID_STATUS_TRANSITION);
        assert_eq!(err.public_message(), "cannot move from pending to completed");
    }
}
