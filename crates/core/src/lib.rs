pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod ranking;
pub mod scoring;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, RoutingEngine};
pub use domain::agent_log::{AgentLogEntry, AgentMessageType, EvidenceKind, EvidenceRef};
pub use domain::assignment::{Assignment, AssignmentId, AssignmentStatus};
pub use domain::business_unit::{BuSku, BuSkuId, BusinessUnit, BusinessUnitId};
pub use domain::delegation::{
    DelegationSession, DelegationSessionId, DelegationStep, DelegationStepId, SessionStatus,
    StepDecision, StepDecisionRequest, StepStatus,
};
pub use domain::fact::{group_facts, Fact, FactMap, Lead, LeadId, LeadRoutingState};
pub use domain::routing::{
    RecommendationId, RecommendationSku, RoutingRecommendation, RoutingRole, RoutingRun,
    RoutingRunId, RunStatus,
};
pub use domain::rules::{RuleCondition, RuleOperator, RuleSet, RuleSetId, RuleSetStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use events::{
    EventSink, InMemoryEventSink, NoopEventSink, RoutingEvent, RoutingEventKind, SkuProposalEvent,
};
pub use ranking::{rank_recommendations, RankedBu, RankingOptions};
pub use scoring::{score_business_units, BuScore, ENGINE_VERSION};
