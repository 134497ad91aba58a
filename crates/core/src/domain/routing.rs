use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::business_unit::{BuSkuId, BusinessUnitId};
use crate::domain::fact::LeadId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingRunId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecommendationId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Pending,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingRole {
    Primary,
    CrossSell,
}

impl RoutingRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::CrossSell => "cross_sell",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "cross_sell" => Self::CrossSell,
            _ => Self::Primary,
        }
    }
}

/// One execution of the routing pipeline for a lead. Status moves one way;
/// retries always create a new run instead of reusing a terminal one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingRun {
    pub id: RoutingRunId,
    pub lead_id: LeadId,
    pub status: RunStatus,
    pub engine_version: String,
    pub last_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RoutingRun {
    pub fn new(lead_id: LeadId, engine_version: impl Into<String>) -> Self {
        Self {
            id: RoutingRunId(uuid::Uuid::new_v4().to_string()),
            lead_id,
            status: RunStatus::Running,
            engine_version: engine_version.into(),
            last_error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.transition_to(RunStatus::Failed)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self.status, next),
            (RunStatus::Running, RunStatus::Pending)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Pending, RunStatus::Completed)
                | (RunStatus::Pending, RunStatus::Failed)
        )
    }

    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidRunTransition { from: self.status, to: next });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// A persisted ranked recommendation: one row per ranked BU per run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingRecommendation {
    pub id: RecommendationId,
    pub routing_run_id: RoutingRunId,
    pub business_unit_id: BusinessUnitId,
    pub bu_code: String,
    pub role: RoutingRole,
    pub rank: u32,
    pub rule_score: f64,
    pub final_score: f64,
    pub confidence: f64,
    pub reason_summary: String,
}

/// A ranked SKU proposal attached to a recommendation. At most three per
/// recommendation; ranks contiguous starting at 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSku {
    pub recommendation_id: RecommendationId,
    pub bu_sku_id: BuSkuId,
    pub rank: u32,
    pub confidence: f64,
    pub rationale: String,
}
