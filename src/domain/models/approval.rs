//! Approval request model for the approval gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decision state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One gated task's request for a human decision.
///
/// Exactly one open request exists per task at a time. Exactly one decision
/// is accepted; later decisions are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub task_id: Uuid,
    /// Text/score supplied by the external reviewer component. The gate
    /// stores it opaquely and never computes confidence itself.
    pub risk_assessment: String,
    pub decision: ApprovalDecision,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(task_id: Uuid, risk_assessment: impl Into<String>, timeout_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            risk_assessment: risk_assessment.into(),
            decision: ApprovalDecision::Pending,
            decided_by: None,
            decided_at: None,
            requested_at: Utc::now(),
            timeout_at,
        }
    }

    pub fn is_open(&self) -> bool {
        self.decision == ApprovalDecision::Pending
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now >= self.timeout_at
    }
}
