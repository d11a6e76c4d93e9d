//! Accounts, roles and business verification (KYC).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id_type!(i64, UserId);

crate::define_string_enum!(
    /// Marketplace role. Every account has exactly one.
    Role {
        Buyer => "buyer",
        Seller => "seller",
        RepairCenter => "repair_center",
        Admin => "admin",
    }
);

impl Role {
    /// Parse the role from its URL segment (`/api/repair-center/...`).
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "buyer" => Some(Role::Buyer),
            "seller" => Some(Role::Seller),
            "repair-center" => Some(Role::RepairCenter),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn path_segment(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::RepairCenter => "repair-center",
            Role::Admin => "admin",
        }
    }

    /// Roles that go through business verification before trading.
    pub fn requires_kyc(&self) -> bool {
        matches!(self, Role::Seller | Role::RepairCenter)
    }

    /// Roles that may create an account through the public register route.
    pub fn can_self_register(&self) -> bool {
        !matches!(self, Role::Admin)
    }
}

crate::define_string_enum!(
    AccountStatus {
        Active => "active",
        Suspended => "suspended",
    }
);

crate::define_string_enum!(
    /// Business verification state for sellers and repair centers.
    KycStatus {
        NotSubmitted => "not_submitted",
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

/// Business details submitted for verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycDetails {
    pub business_name: String,
    pub registration_number: String,
    pub document_url: String,
    /// Set by an admin when the submission is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

/// Full account record as stored. Never serialized to clients directly;
/// use [`UserProfile`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub kyc_status: KycStatus,
    pub kyc: Option<KycDetails>,
    pub mfa_secret: Option<String>,
    pub mfa_enabled: bool,
    /// TOTP step of the last accepted code; codes at or before it are refused.
    pub mfa_last_step: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn is_kyc_approved(&self) -> bool {
        self.kyc_status == KycStatus::Approved
    }
}

/// Insert payload for a new account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub email_verified: bool,
}

/// Client-facing view of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub kyc_status: KycStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc: Option<KycDetails>,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            role: user.role,
            status: user.status,
            email_verified: user.email_verified,
            kyc_status: user.kyc_status,
            kyc: user.kyc.clone(),
            mfa_enabled: user.mfa_enabled,
            created_at: user.created_at,
        }
    }
}

/// Filters for the admin user listing.
#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub status: Option<AccountStatus>,
    pub kyc_status: Option<KycStatus>,
}

impl UserFilter {
    pub fn matches(&self, user: &User) -> bool {
        self.role.map_or(true, |r| r == user.role)
            && self.status.map_or(true, |s| s == user.status)
            && self.kyc_status.map_or(true, |k| k == user.kyc_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_path_segments_round_trip() {
        for role in Role::ALL {
            assert_eq!(Role::from_path_segment(role.path_segment()), Some(*role));
        }
        assert_eq!(Role::from_path_segment("repair_center"), None);
    }

    #[test]
    fn role_serializes_snake_case() {
        let json = serde_json::to_string(&Role::RepairCenter).unwrap();
        assert_eq!(json, "\"repair_center\"");
        assert_eq!("repair_center".parse::<Role>().unwrap(), Role::RepairCenter);
    }

    #[test]
    fn only_sellers_and_centers_need_kyc() {
        assert!(Role::Seller.requires_kyc());
        assert!(Role::RepairCenter.requires_kyc());
        assert!(!Role::Buyer.requires_kyc());
        assert!(!Role::Admin.requires_kyc());
        assert!(!Role::Admin.can_self_register());
    }

    #[test]
    fn user_id_is_transparent() {
        assert_eq!(serde_json::to_string(&UserId(42)).unwrap(), "42");
        assert_eq!("42".parse::<UserId>().unwrap(), UserId(42));
    }
}
