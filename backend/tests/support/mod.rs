//! Shared fixtures for integration tests: an in-memory repository, a manual
//! clock and a capturing notifier wired into the full service set.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use ewaste_market::config::AuthSettings;
use ewaste_market::db::repositories::LocalRepository;
use ewaste_market::db::repository::{FullRepository, UserRepository};
use ewaste_market::models::{
    NewProduct, Product, ProductCondition, QuoteTerms, RepairRequest, Role, UserId, UserProfile,
};
use ewaste_market::services::accounts::{KycDecision, KycSubmission};
use ewaste_market::services::auth::RegisterInput;
use ewaste_market::services::notifier::NotificationKind;
use ewaste_market::services::{Clock, LoginOutcome, ManualClock, MemoryNotifier, Services, Session};

pub const PASSWORD: &str = "Passw0rd!";
pub const ADMIN_EMAIL: &str = "admin@ewaste.test";
pub const ADMIN_PASSWORD: &str = "Adm1nPassword";
pub const JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub fn auth_settings() -> AuthSettings {
    AuthSettings {
        jwt_secret: JWT_SECRET.to_string(),
        admin_email: Some(ADMIN_EMAIL.to_string()),
        admin_password: Some(ADMIN_PASSWORD.to_string()),
        ..Default::default()
    }
}

pub struct TestApp {
    pub repo: LocalRepository,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<MemoryNotifier>,
    pub services: Services,
}

impl TestApp {
    pub fn new() -> Self {
        let repo = LocalRepository::new();
        let clock = Arc::new(ManualClock::new(start_time()));
        let notifier = Arc::new(MemoryNotifier::new());
        let services = Services::new(
            Arc::new(repo.clone()) as Arc<dyn FullRepository>,
            clock.clone(),
            notifier.clone(),
            auth_settings(),
        );
        Self {
            repo,
            clock,
            notifier,
            services,
        }
    }

    pub fn repository(&self) -> Arc<dyn FullRepository> {
        Arc::new(self.repo.clone())
    }

    pub fn verification_token(&self, email: &str) -> String {
        self.notifier
            .last_token(NotificationKind::Verification, email)
            .expect("verification token sent")
    }

    pub fn reset_token(&self, email: &str) -> String {
        self.notifier
            .last_token(NotificationKind::PasswordReset, email)
            .expect("password reset token sent")
    }

    pub async fn register(&self, role: Role, email: &str) -> UserProfile {
        self.services
            .auth
            .register(
                role,
                RegisterInput {
                    email: email.to_string(),
                    password: PASSWORD.to_string(),
                    name: format!("{} user", role),
                    phone: None,
                },
            )
            .await
            .expect("registration succeeds")
    }

    /// Register and confirm the email address.
    pub async fn register_verified(&self, role: Role, email: &str) -> UserProfile {
        self.register(role, email).await;
        let token = self.verification_token(email);
        self.services
            .auth
            .verify_email(&token)
            .await
            .expect("verification succeeds")
    }

    pub async fn login(&self, role: Role, email: &str) -> Session {
        match self
            .services
            .auth
            .login(role, email, PASSWORD)
            .await
            .expect("login succeeds")
        {
            LoginOutcome::Authenticated(session) => session,
            LoginOutcome::MfaRequired(_) => panic!("unexpected MFA challenge"),
        }
    }

    pub async fn admin_id(&self) -> UserId {
        self.services
            .auth
            .bootstrap_admin()
            .await
            .expect("bootstrap admin");
        self.repo
            .find_user_by_email(ADMIN_EMAIL)
            .await
            .expect("repository available")
            .expect("admin exists")
            .id
    }

    /// A verified seller or repair center whose KYC has been approved.
    pub async fn approved_business(&self, role: Role, email: &str) -> UserProfile {
        let profile = self.register_verified(role, email).await;
        self.services
            .accounts
            .submit_kyc(
                profile.id,
                KycSubmission {
                    business_name: format!("{} Ltd", email),
                    registration_number: "REG-0001".to_string(),
                    document_url: "https://docs.ewaste.test/reg-0001.pdf".to_string(),
                },
            )
            .await
            .expect("kyc submitted");
        let admin = self.admin_id().await;
        self.services
            .accounts
            .review_kyc(
                admin,
                profile.id,
                KycDecision {
                    approve: true,
                    reason: None,
                },
            )
            .await
            .expect("kyc approved")
    }

    pub async fn list_product(&self, seller: UserId, name: &str, price: i64, qty: i32) -> Product {
        self.services
            .catalog
            .create_product(seller, new_product(name, price, qty))
            .await
            .expect("product listed")
    }

    pub async fn repair_request(&self, buyer: UserId, center: UserId) -> RepairRequest {
        self.services
            .repair
            .create_request(
                buyer,
                ewaste_market::models::NewRepairRequest {
                    repair_center_id: center,
                    device_type: "laptop".to_string(),
                    brand: "Lenovo".to_string(),
                    model: "T480".to_string(),
                    issue_description: "screen flickers".to_string(),
                },
            )
            .await
            .expect("repair request created")
    }

    pub fn quote_terms(&self, valid_for: Duration) -> QuoteTerms {
        QuoteTerms {
            labor_cents: 5_000,
            parts_cents: 12_000,
            tax_cents: 1_700,
            estimated_days: 3,
            notes: Some("replace panel".to_string()),
            valid_until: self.clock.now() + valid_for,
        }
    }
}

pub fn new_product(name: &str, price: i64, qty: i32) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        description: "tested and cleaned".to_string(),
        category: "laptops".to_string(),
        condition: ProductCondition::Refurbished,
        price_cents: price,
        quantity: qty,
    }
}
