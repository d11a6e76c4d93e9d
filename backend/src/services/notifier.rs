//! Outbound account messages (verification and password-reset links).
//!
//! Delivery is pluggable. The server logs deliveries; tests capture them
//! with [`MemoryNotifier`] so a flow can pick up the token it was sent.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use crate::models::User;

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(&self, user: &User, token: &str) -> Result<(), NotifyError>;

    async fn send_password_reset(&self, user: &User, token: &str) -> Result<(), NotifyError>;
}

/// Records that a message would have been sent. The token itself is never
/// written to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification(&self, user: &User, _token: &str) -> Result<(), NotifyError> {
        info!(user_id = %user.id, "verification email queued");
        Ok(())
    }

    async fn send_password_reset(&self, user: &User, _token: &str) -> Result<(), NotifyError> {
        info!(user_id = %user.id, "password reset email queued");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Verification,
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub email: String,
    pub token: String,
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().clone()
    }

    /// Most recent token of `kind` sent to `email`.
    pub fn last_token(&self, kind: NotificationKind, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|n| n.kind == kind && n.email == email)
            .map(|n| n.token.clone())
    }

    fn push(&self, kind: NotificationKind, user: &User, token: &str) {
        self.sent.lock().push(SentNotification {
            kind,
            email: user.email.clone(),
            token: token.to_string(),
        });
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send_verification(&self, user: &User, token: &str) -> Result<(), NotifyError> {
        self.push(NotificationKind::Verification, user, token);
        Ok(())
    }

    async fn send_password_reset(&self, user: &User, token: &str) -> Result<(), NotifyError> {
        self.push(NotificationKind::PasswordReset, user, token);
        Ok(())
    }
}
