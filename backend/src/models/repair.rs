//! Repair requests, their status machine, and repair quotes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserId;

crate::define_id_type!(i64, RepairRequestId);
crate::define_id_type!(i64, QuoteId);

crate::define_string_enum!(
    /// Lifecycle of a repair request.
    ///
    /// ```text
    /// pending ─▶ quoted ─▶ accepted ─▶ in_progress ⇄ awaiting_parts
    ///    ▲          │                       │
    ///    └──────────┘                       ▼
    ///                          repaired ─▶ quality_check ─▶ completed
    /// ```
    /// `cancelled` is reachable from every status before `repaired`.
    RepairStatus {
        Pending => "pending",
        Quoted => "quoted",
        Accepted => "accepted",
        InProgress => "in_progress",
        AwaitingParts => "awaiting_parts",
        Repaired => "repaired",
        QualityCheck => "quality_check",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

impl RepairStatus {
    /// Adjacency table of the workflow.
    pub fn next_statuses(&self) -> &'static [RepairStatus] {
        use RepairStatus::*;
        match self {
            Pending => &[Quoted, Cancelled],
            Quoted => &[Accepted, Pending, Cancelled],
            Accepted => &[InProgress, Cancelled],
            InProgress => &[AwaitingParts, Repaired, Cancelled],
            AwaitingParts => &[InProgress, Cancelled],
            Repaired => &[QualityCheck],
            QualityCheck => &[Completed, InProgress],
            Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: RepairStatus) -> bool {
        self.next_statuses().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_statuses().is_empty()
    }

    /// Targets a repair center may set through the generic status update.
    /// Quoting, acceptance, cancellation and completion have their own operations.
    pub fn is_work_phase(&self) -> bool {
        matches!(
            self,
            RepairStatus::InProgress
                | RepairStatus::AwaitingParts
                | RepairStatus::Repaired
                | RepairStatus::QualityCheck
        )
    }

    /// Buyers may withdraw only before work starts.
    pub fn buyer_may_cancel(&self) -> bool {
        matches!(
            self,
            RepairStatus::Pending | RepairStatus::Quoted | RepairStatus::Accepted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub id: RepairRequestId,
    pub buyer_id: UserId,
    pub repair_center_id: UserId,
    pub device_type: String,
    pub brand: String,
    pub model: String,
    pub issue_description: String,
    pub status: RepairStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RepairRequest {
    pub fn is_visible_to(&self, user: UserId) -> bool {
        self.buyer_id == user || self.repair_center_id == user
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRepairRequest {
    pub repair_center_id: UserId,
    pub device_type: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub model: String,
    pub issue_description: String,
}

#[derive(Debug, Clone, Default)]
pub struct RepairFilter {
    pub buyer_id: Option<UserId>,
    pub repair_center_id: Option<UserId>,
    pub status: Option<RepairStatus>,
}

impl RepairFilter {
    pub fn matches(&self, request: &RepairRequest) -> bool {
        self.buyer_id.map_or(true, |b| b == request.buyer_id)
            && self
                .repair_center_id
                .map_or(true, |c| c == request.repair_center_id)
            && self.status.map_or(true, |s| s == request.status)
    }
}

crate::define_string_enum!(
    QuoteStatus {
        Pending => "pending",
        Accepted => "accepted",
        Rejected => "rejected",
        Expired => "expired",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairQuote {
    pub id: QuoteId,
    pub request_id: RepairRequestId,
    pub repair_center_id: UserId,
    pub labor_cents: i64,
    pub parts_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub estimated_days: i32,
    pub notes: Option<String>,
    pub valid_until: DateTime<Utc>,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
}

impl RepairQuote {
    /// A quote is acceptable up to and including `valid_until`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }
}

/// Quote terms supplied by a repair center.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTerms {
    pub labor_cents: i64,
    pub parts_cents: i64,
    pub tax_cents: i64,
    pub estimated_days: i32,
    #[serde(default)]
    pub notes: Option<String>,
    pub valid_until: DateTime<Utc>,
}

impl QuoteTerms {
    /// Sum of the cost components, `None` on overflow.
    pub fn total_cents(&self) -> Option<i64> {
        self.labor_cents
            .checked_add(self.parts_cents)?
            .checked_add(self.tax_cents)
    }
}
