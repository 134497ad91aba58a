use async_trait::async_trait;
use thiserror::Error;

use leadroute_core::domain::assignment::{Assignment, AssignmentId};
use leadroute_core::domain::business_unit::{BuSku, BusinessUnit, BusinessUnitId};
use leadroute_core::domain::delegation::{
    DelegationSession, DelegationSessionId, DelegationStep, DelegationStepId,
};
use leadroute_core::domain::fact::{Fact, Lead, LeadId, LeadRoutingState};
use leadroute_core::domain::routing::RoutingRunId;
use leadroute_core::domain::rules::RuleSet;

pub mod assignment;
pub mod business_unit;
pub mod delegation;
pub mod fact;
pub mod lead;
pub mod routing;
pub mod rule_set;

pub use assignment::SqlAssignmentRepository;
pub use business_unit::SqlBusinessUnitRepository;
pub use delegation::SqlDelegationRepository;
pub use fact::SqlFactRepository;
pub use lead::SqlLeadRepository;
pub use routing::{BuOutcome, RunBundle, RunOutcome, SqlRoutingStore};
pub use rule_set::SqlRuleSetRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;
    async fn set_routing_state(
        &self,
        id: &LeadId,
        state: LeadRoutingState,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait FactRepository: Send + Sync {
    async fn facts_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Fact>, RepositoryError>;

    /// Replaces the whole fact set for a lead in one transaction, so a
    /// re-extraction never leaves a mixed generation behind.
    async fn replace_lead_facts(
        &self,
        lead_id: &LeadId,
        facts: Vec<Fact>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RuleSetRepository: Send + Sync {
    /// The highest-version active rule set per business unit.
    async fn latest_active_rule_sets(&self) -> Result<Vec<RuleSet>, RepositoryError>;
    async fn save(&self, rule_set: RuleSet) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BusinessUnitRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<BusinessUnit>, RepositoryError>;
    async fn skus_for_unit(&self, id: &BusinessUnitId) -> Result<Vec<BuSku>, RepositoryError>;
    async fn save(&self, unit: BusinessUnit) -> Result<(), RepositoryError>;
    async fn save_sku(&self, sku: BuSku) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn find_by_id(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError>;
    async fn find_active(
        &self,
        lead_id: &LeadId,
        business_unit_id: &BusinessUnitId,
    ) -> Result<Option<Assignment>, RepositoryError>;
    async fn list_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError>;
    async fn save(&self, assignment: Assignment) -> Result<(), RepositoryError>;
}

pub(crate) fn parse_timestamp(
    column: &str,
    value: String,
) -> Result<chrono::DateTime<chrono::Utc>, RepositoryError> {
    chrono::DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&chrono::Utc))
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        })
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn find_session(
        &self,
        id: &DelegationSessionId,
    ) -> Result<Option<DelegationSession>, RepositoryError>;
    async fn find_session_by_run(
        &self,
        routing_run_id: &RoutingRunId,
    ) -> Result<Option<DelegationSession>, RepositoryError>;
    async fn upsert_session(&self, session: DelegationSession) -> Result<(), RepositoryError>;
    async fn find_step(
        &self,
        id: &DelegationStepId,
    ) -> Result<Option<DelegationStep>, RepositoryError>;
    async fn list_steps(
        &self,
        session_id: &DelegationSessionId,
    ) -> Result<Vec<DelegationStep>, RepositoryError>;
    async fn upsert_step(&self, step: DelegationStep) -> Result<(), RepositoryError>;
}
