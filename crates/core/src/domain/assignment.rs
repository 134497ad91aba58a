use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business_unit::BusinessUnitId;
use crate::domain::fact::LeadId;
use crate::domain::routing::{RecommendationId, RoutingRole};
use crate::domain::validate_rejection_reason;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    PendingSynergy,
    Approved,
    Dispatched,
    Canceled,
    BuRejected,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingSynergy => "pending_synergy",
            Self::Approved => "approved",
            Self::Dispatched => "dispatched",
            Self::Canceled => "canceled",
            Self::BuRejected => "bu_rejected",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "approved" => Self::Approved,
            "dispatched" => Self::Dispatched,
            "canceled" => Self::Canceled,
            "bu_rejected" => Self::BuRejected,
            _ => Self::PendingSynergy,
        }
    }

    /// Active assignments block re-routing of the same (lead, BU) pair.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::PendingSynergy | Self::Approved | Self::Dispatched)
    }

    pub const ACTIVE_STATUSES: &[AssignmentStatus] =
        &[Self::PendingSynergy, Self::Approved, Self::Dispatched];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub lead_id: LeadId,
    pub business_unit_id: BusinessUnitId,
    pub routing_recommendation_id: RecommendationId,
    pub assigned_role: RoutingRole,
    pub status: AssignmentStatus,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub decision_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn pending(
        lead_id: LeadId,
        business_unit_id: BusinessUnitId,
        routing_recommendation_id: RecommendationId,
        assigned_role: RoutingRole,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: AssignmentId(uuid::Uuid::new_v4().to_string()),
            lead_id,
            business_unit_id,
            routing_recommendation_id,
            assigned_role,
            status: AssignmentStatus::PendingSynergy,
            approved_by: None,
            approved_at: None,
            dispatched_at: None,
            decision_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::{Approved, BuRejected, Canceled, Dispatched, PendingSynergy};
        matches!(
            (self.status, next),
            (PendingSynergy, Approved)
                | (PendingSynergy, Canceled)
                | (PendingSynergy, BuRejected)
                | (Approved, Dispatched)
                | (Approved, Canceled)
        )
    }

    pub fn approve(&mut self, approved_by: impl Into<String>) -> Result<(), DomainError> {
        self.transition_to(AssignmentStatus::Approved)?;
        self.approved_by = Some(approved_by.into());
        self.approved_at = Some(Utc::now());
        Ok(())
    }

    pub fn dispatch(&mut self) -> Result<(), DomainError> {
        self.transition_to(AssignmentStatus::Dispatched)?;
        self.dispatched_at = Some(Utc::now());
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<&str>) -> Result<(), DomainError> {
        self.transition_to(AssignmentStatus::Canceled)?;
        self.decision_reason = reason.map(str::trim).map(str::to_string);
        Ok(())
    }

    /// A BU rejection requires an explicit reason of at least five characters.
    pub fn reject(&mut self, reason: Option<&str>) -> Result<(), DomainError> {
        let reason = validate_rejection_reason(reason)?;
        self.transition_to(AssignmentStatus::BuRejected)?;
        self.decision_reason = Some(reason);
        Ok(())
    }

    fn transition_to(&mut self, next: AssignmentStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidAssignmentTransition { from: self.status, to: next });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
