//! End-to-end account and session flows against the in-memory repository.

mod support;

use chrono::Duration;

use ewaste_market::auth::totp;
use ewaste_market::db::repository::{UserRepository, UserUpdate};
use ewaste_market::models::{AccountStatus, KycStatus, Role};
use ewaste_market::services::accounts::ProfileUpdate;
use ewaste_market::services::auth::RegisterInput;
use ewaste_market::services::{codes, Clock, LoginOutcome};
use support::{TestApp, ADMIN_EMAIL, ADMIN_PASSWORD, PASSWORD};

// =========================================================
// Registration and verification
// =========================================================

#[tokio::test]
async fn test_login_requires_verified_email() {
    let app = TestApp::new();
    app.register(Role::Buyer, "ana@example.com").await;

    let err = app
        .services
        .auth
        .login(Role::Buyer, "ana@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::EMAIL_NOT_VERIFIED);

    let token = app.verification_token("ana@example.com");
    let profile = app.services.auth.verify_email(&token).await.unwrap();
    assert!(profile.email_verified);

    let session = app.login(Role::Buyer, "ana@example.com").await;
    assert_eq!(session.token_type, "Bearer");
    assert_eq!(session.user.email, "ana@example.com");
}

#[tokio::test]
async fn test_verification_token_is_single_use() {
    let app = TestApp::new();
    app.register(Role::Buyer, "once@example.com").await;
    let token = app.verification_token("once@example.com");

    app.services.auth.verify_email(&token).await.unwrap();
    let err = app.services.auth.verify_email(&token).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_VERIFICATION_TOKEN);
}

#[tokio::test]
async fn test_resend_verification_invalidates_previous_token() {
    let app = TestApp::new();
    app.register(Role::Seller, "resend@example.com").await;
    let first = app.verification_token("resend@example.com");

    app.services
        .auth
        .resend_verification("resend@example.com")
        .await
        .unwrap();
    let second = app.verification_token("resend@example.com");
    assert_ne!(first, second);

    let err = app.services.auth.verify_email(&first).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_VERIFICATION_TOKEN);
    app.services.auth.verify_email(&second).await.unwrap();
}

#[tokio::test]
async fn test_verification_token_expires() {
    let app = TestApp::new();
    app.register(Role::Buyer, "late@example.com").await;
    let token = app.verification_token("late@example.com");

    app.clock.advance(Duration::hours(24));
    let err = app.services.auth.verify_email(&token).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_VERIFICATION_TOKEN);
}

#[tokio::test]
async fn test_duplicate_email_ignores_case() {
    let app = TestApp::new();
    app.register(Role::Buyer, "dup@example.com").await;

    let err = app
        .services
        .auth
        .register(
            Role::Seller,
            RegisterInput {
                email: "  DUP@Example.com ".to_string(),
                password: PASSWORD.to_string(),
                name: "Other".to_string(),
                phone: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::EMAIL_IN_USE);
}

#[tokio::test]
async fn test_weak_password_and_admin_registration_rejected() {
    let app = TestApp::new();
    let weak = app
        .services
        .auth
        .register(
            Role::Buyer,
            RegisterInput {
                email: "weak@example.com".to_string(),
                password: "password".to_string(),
                name: "Weak".to_string(),
                phone: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(weak.code(), codes::WEAK_PASSWORD);

    let admin = app
        .services
        .auth
        .register(
            Role::Admin,
            RegisterInput {
                email: "root@example.com".to_string(),
                password: PASSWORD.to_string(),
                name: "Root".to_string(),
                phone: None,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(admin.code(), codes::FORBIDDEN);
}

#[tokio::test]
async fn test_login_under_wrong_role_looks_like_bad_password() {
    let app = TestApp::new();
    app.register_verified(Role::Seller, "seller@example.com").await;

    let wrong_role = app
        .services
        .auth
        .login(Role::Buyer, "seller@example.com", PASSWORD)
        .await
        .unwrap_err();
    let wrong_password = app
        .services
        .auth
        .login(Role::Seller, "seller@example.com", "Wrong1234")
        .await
        .unwrap_err();
    let unknown = app
        .services
        .auth
        .login(Role::Seller, "nobody@example.com", PASSWORD)
        .await
        .unwrap_err();

    assert_eq!(wrong_role.code(), codes::INVALID_CREDENTIALS);
    assert_eq!(wrong_password.code(), codes::INVALID_CREDENTIALS);
    assert_eq!(unknown.code(), codes::INVALID_CREDENTIALS);
    assert_eq!(wrong_role.to_string(), wrong_password.to_string());
}

// =========================================================
// Access and refresh tokens
// =========================================================

#[tokio::test]
async fn test_access_token_expires_at_boundary() {
    let app = TestApp::new();
    app.register_verified(Role::Buyer, "ttl@example.com").await;
    let session = app.login(Role::Buyer, "ttl@example.com").await;

    app.clock.advance(Duration::seconds(session.expires_in - 1));
    let user = app
        .services
        .auth
        .authenticate(&session.access_token)
        .await
        .unwrap();
    assert_eq!(user.email, "ttl@example.com");

    app.clock.advance(Duration::seconds(1));
    let err = app
        .services
        .auth
        .authenticate(&session.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::TOKEN_EXPIRED);
}

#[tokio::test]
async fn test_tampered_access_token_rejected() {
    let app = TestApp::new();
    app.register_verified(Role::Buyer, "tamper@example.com").await;
    let session = app.login(Role::Buyer, "tamper@example.com").await;

    let mut tampered = session.access_token.clone();
    tampered.push('x');
    let err = app.services.auth.authenticate(&tampered).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_TOKEN);

    // A refresh token is not an access token.
    let err = app
        .services
        .auth
        .authenticate(&session.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_TOKEN);
}

#[tokio::test]
async fn test_refresh_rotates_and_detects_reuse() {
    let app = TestApp::new();
    let profile = app.register_verified(Role::Buyer, "rot@example.com").await;
    let first = app.login(Role::Buyer, "rot@example.com").await;
    let other_device = app.login(Role::Buyer, "rot@example.com").await;

    let second = app
        .services
        .auth
        .refresh(&first.refresh_token)
        .await
        .unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(app.repo.active_refresh_token_count(profile.id), 2);

    // Presenting the rotated-out token again revokes every session.
    let err = app
        .services
        .auth
        .refresh(&first.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::REFRESH_TOKEN_REUSED);
    assert_eq!(app.repo.active_refresh_token_count(profile.id), 0);

    for token in [&second.refresh_token, &other_device.refresh_token] {
        let err = app.services.auth.refresh(token).await.unwrap_err();
        assert_eq!(err.code(), codes::REFRESH_TOKEN_REUSED);
    }
}

#[tokio::test]
async fn test_refresh_token_expiry_and_unknown_token() {
    let app = TestApp::new();
    app.register_verified(Role::Buyer, "exp@example.com").await;
    let session = app.login(Role::Buyer, "exp@example.com").await;

    let err = app.services.auth.refresh("not-a-token").await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_REFRESH_TOKEN);

    app.clock.set(session.refresh_token_expires_at);
    let err = app
        .services
        .auth
        .refresh(&session.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::REFRESH_TOKEN_EXPIRED);
}

#[tokio::test]
async fn test_logout_is_idempotent_and_logout_all_counts() {
    let app = TestApp::new();
    let profile = app.register_verified(Role::Buyer, "out@example.com").await;
    let a = app.login(Role::Buyer, "out@example.com").await;
    app.login(Role::Buyer, "out@example.com").await;
    app.login(Role::Buyer, "out@example.com").await;

    app.services.auth.logout(&a.refresh_token).await.unwrap();
    app.services.auth.logout(&a.refresh_token).await.unwrap();
    app.services.auth.logout("unknown").await.unwrap();
    assert_eq!(app.repo.active_refresh_token_count(profile.id), 2);

    let revoked = app.services.auth.logout_all(profile.id).await.unwrap();
    assert_eq!(revoked, 2);
    assert_eq!(app.repo.active_refresh_token_count(profile.id), 0);
}

// =========================================================
// Password recovery
// =========================================================

#[tokio::test]
async fn test_password_reset_flow() {
    let app = TestApp::new();
    let profile = app.register_verified(Role::Buyer, "reset@example.com").await;
    app.login(Role::Buyer, "reset@example.com").await;

    app.services
        .auth
        .forgot_password("reset@example.com")
        .await
        .unwrap();
    let token = app.reset_token("reset@example.com");

    let weak = app
        .services
        .auth
        .reset_password(&token, "short")
        .await
        .unwrap_err();
    assert_eq!(weak.code(), codes::WEAK_PASSWORD);

    app.services
        .auth
        .reset_password(&token, "N3wPassword")
        .await
        .unwrap();
    assert_eq!(app.repo.active_refresh_token_count(profile.id), 0);

    let reused = app
        .services
        .auth
        .reset_password(&token, "An0therPassword")
        .await
        .unwrap_err();
    assert_eq!(reused.code(), codes::INVALID_RESET_TOKEN);

    let old = app
        .services
        .auth
        .login(Role::Buyer, "reset@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(old.code(), codes::INVALID_CREDENTIALS);
    assert!(app
        .services
        .auth
        .login(Role::Buyer, "reset@example.com", "N3wPassword")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_forgot_password_does_not_reveal_accounts() {
    let app = TestApp::new();
    app.services
        .auth
        .forgot_password("ghost@example.com")
        .await
        .unwrap();
    app.services.auth.forgot_password("not an email").await.unwrap();
    assert!(app.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_change_password_checks_current_and_revokes_sessions() {
    let app = TestApp::new();
    let profile = app.register_verified(Role::Seller, "chg@example.com").await;
    app.login(Role::Seller, "chg@example.com").await;

    let err = app
        .services
        .auth
        .change_password(profile.id, "Wrong1234", "N3wPassword")
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_CREDENTIALS);

    app.services
        .auth
        .change_password(profile.id, PASSWORD, "N3wPassword")
        .await
        .unwrap();
    assert_eq!(app.repo.active_refresh_token_count(profile.id), 0);
}

// =========================================================
// Suspension
// =========================================================

#[tokio::test]
async fn test_suspension_blocks_every_credential() {
    let app = TestApp::new();
    let admin = app.admin_id().await;
    let profile = app.register_verified(Role::Buyer, "bad@example.com").await;
    let session = app.login(Role::Buyer, "bad@example.com").await;

    app.services
        .accounts
        .set_user_status(admin, profile.id, AccountStatus::Suspended)
        .await
        .unwrap();

    let login = app
        .services
        .auth
        .login(Role::Buyer, "bad@example.com", PASSWORD)
        .await
        .unwrap_err();
    assert_eq!(login.code(), codes::ACCOUNT_SUSPENDED);

    let access = app
        .services
        .auth
        .authenticate(&session.access_token)
        .await
        .unwrap_err();
    assert_eq!(access.code(), codes::ACCOUNT_SUSPENDED);

    let refresh = app
        .services
        .auth
        .refresh(&session.refresh_token)
        .await
        .unwrap_err();
    assert_eq!(refresh.code(), codes::ACCOUNT_SUSPENDED);

    app.services
        .accounts
        .set_user_status(admin, profile.id, AccountStatus::Active)
        .await
        .unwrap();
    app.login(Role::Buyer, "bad@example.com").await;
}

#[tokio::test]
async fn test_profile_write_racing_suspension_keeps_suspension() {
    let app = TestApp::new();
    let admin = app.admin_id().await;
    let profile = app.register_verified(Role::Buyer, "racer@example.com").await;
    let session = app.login(Role::Buyer, "racer@example.com").await;

    // The account is read before the suspension and written after it.
    let before = app.repo.find_user_by_id(profile.id).await.unwrap().unwrap();
    assert_eq!(before.status, AccountStatus::Active);
    app.services
        .accounts
        .set_user_status(admin, profile.id, AccountStatus::Suspended)
        .await
        .unwrap();
    let written = app
        .repo
        .update_user(
            before.id,
            UserUpdate::Profile {
                name: Some("Renamed".to_string()),
                phone: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(written.name, "Renamed");
    assert_eq!(written.status, AccountStatus::Suspended);

    let updated = app
        .services
        .accounts
        .update_profile(
            profile.id,
            ProfileUpdate {
                name: None,
                phone: Some("+34 600 000 000".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, AccountStatus::Suspended);
    assert_eq!(updated.name, "Renamed");

    let err = app
        .services
        .auth
        .authenticate(&session.access_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::ACCOUNT_SUSPENDED);
}

#[tokio::test]
async fn test_password_change_keeps_kyc_decision() {
    let app = TestApp::new();
    let seller = app.approved_business(Role::Seller, "kept@example.com").await;
    app.services
        .auth
        .change_password(seller.id, PASSWORD, "N3wPassword!")
        .await
        .unwrap();

    let profile = app.services.accounts.get_profile(seller.id).await.unwrap();
    assert_eq!(profile.kyc_status, KycStatus::Approved);
    assert!(profile.email_verified);
}

#[tokio::test]
async fn test_admin_cannot_suspend_self() {
    let app = TestApp::new();
    let admin = app.admin_id().await;
    let err = app
        .services
        .accounts
        .set_user_status(admin, admin, AccountStatus::Suspended)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::CANNOT_MODIFY_SELF);
}

// =========================================================
// Admin bootstrap and MFA
// =========================================================

#[tokio::test]
async fn test_bootstrap_admin_runs_once() {
    let app = TestApp::new();
    assert!(app.services.auth.bootstrap_admin().await.unwrap());
    assert!(!app.services.auth.bootstrap_admin().await.unwrap());
    assert_eq!(app.repo.user_count(), 1);
}

#[tokio::test]
async fn test_admin_mfa_login() {
    let app = TestApp::new();
    let admin = app.admin_id().await;

    let setup = app.services.auth.mfa_setup(admin).await.unwrap();
    assert!(setup.provisioning_uri.starts_with("otpauth://totp/"));

    let login = app
        .services
        .auth
        .login(Role::Admin, ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();
    assert!(
        matches!(login, LoginOutcome::Authenticated(_)),
        "MFA stays off until a code is confirmed"
    );

    let code = totp::code_at(&setup.secret, app.clock.now().timestamp()).unwrap();
    app.services.auth.mfa_enable(admin, &code).await.unwrap();

    let again = app.services.auth.mfa_enable(admin, &code).await.unwrap_err();
    assert_eq!(again.code(), codes::MFA_ALREADY_ENABLED);

    let challenge = match app
        .services
        .auth
        .login(Role::Admin, ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap()
    {
        LoginOutcome::MfaRequired(challenge) => challenge,
        LoginOutcome::Authenticated(_) => panic!("expected an MFA challenge"),
    };

    // The challenge token is not an access token.
    let err = app
        .services
        .auth
        .authenticate(&challenge.challenge_token)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_TOKEN);

    // The code that enabled MFA cannot be used again.
    let replayed = app
        .services
        .auth
        .verify_mfa(Role::Admin, &challenge.challenge_token, &code)
        .await
        .unwrap_err();
    assert_eq!(replayed.code(), codes::INVALID_MFA_CODE);

    app.clock.advance(Duration::seconds(totp::STEP_SECS));
    let next = totp::code_at(&setup.secret, app.clock.now().timestamp()).unwrap();
    let session = app
        .services
        .auth
        .verify_mfa(Role::Admin, &challenge.challenge_token, &next)
        .await
        .unwrap();
    assert_eq!(session.user.role, Role::Admin);
    assert!(session.user.mfa_enabled);

    let second = match app
        .services
        .auth
        .login(Role::Admin, ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap()
    {
        LoginOutcome::MfaRequired(challenge) => challenge,
        LoginOutcome::Authenticated(_) => panic!("expected an MFA challenge"),
    };
    let err = app
        .services
        .auth
        .verify_mfa(Role::Admin, &second.challenge_token, &next)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::INVALID_MFA_CODE);
}

#[tokio::test]
async fn test_mfa_disable_needs_unused_code() {
    let app = TestApp::new();
    let admin = app.admin_id().await;
    let setup = app.services.auth.mfa_setup(admin).await.unwrap();
    let code = totp::code_at(&setup.secret, app.clock.now().timestamp()).unwrap();
    app.services.auth.mfa_enable(admin, &code).await.unwrap();

    let err = app.services.auth.mfa_disable(admin, &code).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_MFA_CODE);

    app.clock.advance(Duration::seconds(totp::STEP_SECS));
    let next = totp::code_at(&setup.secret, app.clock.now().timestamp()).unwrap();
    app.services.auth.mfa_disable(admin, &next).await.unwrap();

    let err = app.services.auth.mfa_disable(admin, &next).await.unwrap_err();
    assert_eq!(err.code(), codes::MFA_NOT_ENABLED);
    let login = app
        .services
        .auth
        .login(Role::Admin, ADMIN_EMAIL, ADMIN_PASSWORD)
        .await
        .unwrap();
    assert!(matches!(login, LoginOutcome::Authenticated(_)));
}

#[tokio::test]
async fn test_mfa_is_admin_only() {
    let app = TestApp::new();
    let buyer = app.register_verified(Role::Buyer, "mfa@example.com").await;
    let err = app.services.auth.mfa_setup(buyer.id).await.unwrap_err();
    assert_eq!(err.code(), codes::MFA_NOT_ALLOWED);
}
