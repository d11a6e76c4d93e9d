use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::{Role, UserId};

/// One admin action recorded by the audit middleware.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: UserId,
    pub actor_role: Role,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEntry {
    pub actor_id: UserId,
    pub actor_role: Role,
    pub method: String,
    pub path: String,
    pub status_code: u16,
}
