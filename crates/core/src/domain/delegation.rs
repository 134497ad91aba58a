use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::fact::LeadId;
use crate::domain::routing::RoutingRunId;
use crate::domain::validate_rejection_reason;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationSessionId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegationStepId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    PendingApproval,
    Completed,
    Rejected,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::PendingApproval => "pending_approval",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending_approval" => Self::PendingApproval,
            "completed" => Self::Completed,
            "rejected" => Self::Rejected,
            "failed" => Self::Failed,
            _ => Self::InProgress,
        }
    }

    /// Wire statuses arrive SCREAMING_SNAKE_CASE from the remote service.
    pub fn parse_wire(raw: &str) -> Self {
        Self::parse(raw.trim().to_ascii_lowercase().as_str())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }
}

/// Terminal session statuses are immutable: applying a further transition is
/// a no-op that reports the status the session already holds.
pub fn apply_session_status_transition(current: SessionStatus, next: SessionStatus) -> SessionStatus {
    if current.is_terminal() {
        return current;
    }
    next
}

/// Local mirror of one remote delegation session; exactly one per routing
/// run (upsert keyed by routing_run_id).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationSession {
    pub id: DelegationSessionId,
    pub routing_run_id: RoutingRunId,
    pub lead_id: LeadId,
    pub thread_id: String,
    pub status: SessionStatus,
    pub pending_step_id: Option<DelegationStepId>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// One unit of remote multi-agent work awaiting human approval. Unique per
/// (session, step_index); upserted, never hard-deleted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationStep {
    pub id: DelegationStepId,
    pub session_id: DelegationSessionId,
    pub step_index: i64,
    pub subagent_name: String,
    pub status: StepStatus,
    pub request_payload: serde_json::Value,
    pub decision_by: Option<String>,
    pub decision_reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepDecision {
    Approve,
    Reject,
}

impl StepDecision {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }
}

/// A human decision on a pending delegation step. Validated locally before
/// anything is forwarded to the remote session.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct StepDecisionRequest {
    pub decision: StepDecision,
    pub reviewer_id: String,
    pub reason: Option<String>,
}

impl StepDecisionRequest {
    pub fn validate(&self) -> Result<Option<String>, DomainError> {
        if self.reviewer_id.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "step decision requires a reviewer id".to_string(),
            ));
        }
        match self.decision {
            StepDecision::Approve => Ok(self.reason.as_deref().map(str::trim).map(str::to_string)),
            StepDecision::Reject => {
                validate_rejection_reason(self.reason.as_deref()).map(Some)
            }
        }
    }
}
