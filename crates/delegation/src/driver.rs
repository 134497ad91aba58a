//! Delegation session driver.
//!
//! Alternative routing engine: the heavy lifting happens in a remote
//! multi-agent service, and this driver mirrors its session state locally,
//! parks runs that need a human decision, and lands terminal outcomes
//! through the same transactional store as the deterministic engine.
//!
//! Every remote envelope, no matter which call produced it, flows through
//! [`DelegationDriver::apply_envelope`]. Terminal local sessions are
//! immutable: late envelopes are no-ops.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use leadroute_core::domain::agent_log::{
    AgentLogEntry, AgentMessageType, EvidenceKind, EvidenceRef,
};
use leadroute_core::domain::business_unit::{BuSkuId, BusinessUnitId};
use leadroute_core::domain::delegation::{
    apply_session_status_transition, DelegationSession, DelegationSessionId, DelegationStep,
    DelegationStepId, SessionStatus, StepDecision, StepDecisionRequest, StepStatus,
};
use leadroute_core::domain::fact::{LeadId, LeadRoutingState};
use leadroute_core::domain::routing::{
    RecommendationId, RecommendationSku, RoutingRecommendation, RoutingRole, RoutingRun,
    RoutingRunId, RunStatus,
};
use leadroute_core::errors::DomainError;
use leadroute_core::events::{EventSink, RoutingEvent, RoutingEventKind};
use leadroute_db::repositories::{
    BuOutcome, DelegationRepository, FactRepository, LeadRepository, RepositoryError, RunOutcome,
    SqlDelegationRepository, SqlFactRepository, SqlLeadRepository, SqlRoutingStore,
};
use leadroute_db::DbPool;

use crate::client::{
    DelegationTransport, FinalResult, RemoteAgentMessage, RemoteDecisionRequest,
    RemoteSkuProposal, SessionEnvelope, StartSessionRequest,
};

pub const DELEGATION_ENGINE_VERSION: &str = "delegation-v1";

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("lead {0} not found")]
    LeadNotFound(String),
    #[error("delegation session {0} not found")]
    SessionNotFound(String),
    #[error("delegation step {0} not found")]
    StepNotFound(String),
    #[error("remote delegation call failed: {0}")]
    Remote(String),
    #[error("delegation session ended {status}: {reason}")]
    SessionEnded { status: &'static str, reason: String },
}

pub struct DelegationDriver<T: DelegationTransport> {
    transport: T,
    pool: DbPool,
    events: Arc<dyn EventSink>,
}

impl<T: DelegationTransport> DelegationDriver<T> {
    pub fn new(transport: T, pool: DbPool, events: Arc<dyn EventSink>) -> Self {
        Self { transport, pool, events }
    }

    /// Creates a routing run, opens the remote session, and applies the
    /// first envelope. A transport failure fails the run before returning.
    pub async fn start_run(
        &self,
        lead_id: &LeadId,
        triggered_by: &str,
    ) -> Result<DelegationSession, DelegationError> {
        let leads = SqlLeadRepository::new(self.pool.clone());
        if leads.find_by_id(lead_id).await?.is_none() {
            return Err(DelegationError::LeadNotFound(lead_id.0.clone()));
        }

        let store = SqlRoutingStore::new(self.pool.clone());
        let run = RoutingRun::new(lead_id.clone(), DELEGATION_ENGINE_VERSION);
        store.create_run(&run).await?;

        let fact_count =
            SqlFactRepository::new(self.pool.clone()).facts_for_lead(lead_id).await?.len();
        self.emit(
            lead_id,
            &run.id,
            RoutingEventKind::RoutingStarted {
                engine: DELEGATION_ENGINE_VERSION.to_string(),
                fact_count,
            },
        );

        let session_id = Uuid::new_v4().to_string();
        let thread_id = format!("thread-{}", run.id.0);
        let request = StartSessionRequest {
            session_id: session_id.clone(),
            routing_run_id: run.id.0.clone(),
            lead_id: lead_id.0.clone(),
            triggered_by: triggered_by.to_string(),
            thread_id: thread_id.clone(),
        };

        let envelope = match self.transport.start_session(&request).await {
            Ok(envelope) => envelope,
            Err(error) => {
                let reason = format!("could not start delegation session: {error}");
                store.mark_run_failed(&run.id, lead_id, &reason).await?;
                self.emit(lead_id, &run.id, RoutingEventKind::RoutingFailed { reason: reason.clone() });
                return Err(DelegationError::Remote(reason));
            }
        };

        let now = Utc::now();
        let session = DelegationSession {
            id: DelegationSessionId(envelope.session_id.clone()),
            routing_run_id: run.id.clone(),
            lead_id: lead_id.clone(),
            thread_id,
            status: SessionStatus::InProgress,
            pending_step_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        self.apply_envelope(session, envelope).await
    }

    /// Validates and forwards a human decision on a pending step, then
    /// applies whatever envelope the remote returns. Nothing is mutated and
    /// no remote call is made until the request passes local validation.
    pub async fn decide_step(
        &self,
        step_id: &DelegationStepId,
        request: &StepDecisionRequest,
    ) -> Result<DelegationSession, DelegationError> {
        let reason = request.validate()?;

        let repo = SqlDelegationRepository::new(self.pool.clone());
        let mut step = repo
            .find_step(step_id)
            .await?
            .ok_or_else(|| DelegationError::StepNotFound(step_id.0.clone()))?;
        let session = repo
            .find_session(&step.session_id)
            .await?
            .ok_or_else(|| DelegationError::SessionNotFound(step.session_id.0.clone()))?;

        if session.status.is_terminal() {
            return Err(DomainError::SessionTerminal { status: session.status }.into());
        }
        if step.status != StepStatus::Pending {
            return Err(DomainError::StepNotPending {
                step_id: step.id.0.clone(),
                status: step.status,
            }
            .into());
        }

        let remote_request = RemoteDecisionRequest {
            decision: request.decision.as_wire_str().to_string(),
            reviewer_id: request.reviewer_id.clone(),
            reason: reason.clone(),
        };
        let envelope = self
            .transport
            .send_decision(&session.id.0, &step.id.0, &remote_request)
            .await
            .map_err(|error| DelegationError::Remote(error.to_string()))?;

        step.status = match request.decision {
            StepDecision::Approve => StepStatus::Approved,
            StepDecision::Reject => StepStatus::Rejected,
        };
        step.decision_by = Some(request.reviewer_id.clone());
        step.decision_reason = reason;
        step.decided_at = Some(Utc::now());
        repo.upsert_step(step.clone()).await?;

        self.emit(
            &session.lead_id,
            &session.routing_run_id,
            RoutingEventKind::DelegationDecisionApplied {
                session_id: session.id.0.clone(),
                step_id: step.id.0.clone(),
                decision: request.decision.as_wire_str().to_string(),
            },
        );

        self.apply_envelope(session, envelope).await
    }

    /// Polls the remote session and applies the current envelope.
    pub async fn refresh_session(
        &self,
        session_id: &DelegationSessionId,
    ) -> Result<DelegationSession, DelegationError> {
        let repo = SqlDelegationRepository::new(self.pool.clone());
        let session = repo
            .find_session(session_id)
            .await?
            .ok_or_else(|| DelegationError::SessionNotFound(session_id.0.clone()))?;
        if session.status.is_terminal() {
            return Ok(session);
        }

        let envelope = self
            .transport
            .get_session(&session.id.0)
            .await
            .map_err(|error| DelegationError::Remote(error.to_string()))?;
        self.apply_envelope(session, envelope).await
    }

    /// The uniform envelope handler. Mirrors session and pending step rows,
    /// then acts on the resulting status: park the run on PENDING_APPROVAL,
    /// land the outcome on COMPLETED, fail the run on FAILED or REJECTED.
    async fn apply_envelope(
        &self,
        mut session: DelegationSession,
        envelope: SessionEnvelope,
    ) -> Result<DelegationSession, DelegationError> {
        if session.status.is_terminal() {
            return Ok(session);
        }

        let repo = SqlDelegationRepository::new(self.pool.clone());
        let next = SessionStatus::parse_wire(&envelope.status);
        session.status = apply_session_status_transition(session.status, next);
        session.last_error = envelope.error.clone();
        session.pending_step_id = envelope
            .pending_step
            .as_ref()
            .map(|step| DelegationStepId(step.step_id.clone()));
        session.updated_at = Utc::now();
        repo.upsert_session(session.clone()).await?;

        if let Some(remote_step) = &envelope.pending_step {
            let step_id = DelegationStepId(remote_step.step_id.clone());
            // A decided step is never reopened by a stale envelope.
            let undecided = match repo.find_step(&step_id).await? {
                Some(existing) => existing.status == StepStatus::Pending,
                None => true,
            };
            if undecided {
                repo.upsert_step(DelegationStep {
                    id: step_id,
                    session_id: session.id.clone(),
                    step_index: remote_step.step_index,
                    subagent_name: remote_step.subagent_name.clone(),
                    status: StepStatus::Pending,
                    request_payload: remote_step.request_payload.clone(),
                    decision_by: None,
                    decision_reason: None,
                    decided_at: None,
                    executed_at: None,
                    error: None,
                })
                .await?;
            }
        }

        let store = SqlRoutingStore::new(self.pool.clone());
        match session.status {
            SessionStatus::PendingApproval => {
                if let Some(mut run) = store.find_run(&session.routing_run_id).await? {
                    if run.status == RunStatus::Running {
                        run.transition_to(RunStatus::Pending)?;
                        store.update_run(&run).await?;
                    }
                }
                SqlLeadRepository::new(self.pool.clone())
                    .set_routing_state(&session.lead_id, LeadRoutingState::RoutingPendingApproval)
                    .await?;

                self.emit(
                    &session.lead_id,
                    &session.routing_run_id,
                    RoutingEventKind::SessionPending {
                        session_id: session.id.0.clone(),
                        status: session.status.as_str().to_string(),
                    },
                );
                if let Some(step) = &envelope.pending_step {
                    self.emit(
                        &session.lead_id,
                        &session.routing_run_id,
                        RoutingEventKind::DelegationApprovalRequired {
                            session_id: session.id.0.clone(),
                            step_id: step.step_id.clone(),
                            step_index: step.step_index,
                            subagent_name: step.subagent_name.clone(),
                        },
                    );
                }
            }
            SessionStatus::Completed => {
                let Some(final_result) = envelope.final_result else {
                    let reason = "completed delegation envelope carried no final result";
                    store
                        .mark_run_failed(&session.routing_run_id, &session.lead_id, reason)
                        .await?;
                    self.emit(
                        &session.lead_id,
                        &session.routing_run_id,
                        RoutingEventKind::RoutingFailed { reason: reason.to_string() },
                    );
                    return Err(DelegationError::Remote(reason.to_string()));
                };

                let outcome =
                    build_outcome(&session, &final_result, &envelope.agent_messages);
                let primary_bu_code = outcome
                    .bu_outcomes
                    .iter()
                    .find(|bu| bu.recommendation.role == RoutingRole::Primary)
                    .map(|bu| bu.recommendation.bu_code.clone());
                let recommendation_count = outcome.bu_outcomes.len();
                store.persist_run_outcome(&outcome).await?;

                self.emit(
                    &session.lead_id,
                    &session.routing_run_id,
                    RoutingEventKind::RoutingCompleted { primary_bu_code, recommendation_count },
                );
            }
            SessionStatus::Failed | SessionStatus::Rejected => {
                let reason = session.last_error.clone().unwrap_or_else(|| {
                    format!("delegation session ended {}", session.status.as_str())
                });
                store.mark_run_failed(&session.routing_run_id, &session.lead_id, &reason).await?;
                self.emit(
                    &session.lead_id,
                    &session.routing_run_id,
                    RoutingEventKind::RoutingFailed { reason: reason.clone() },
                );
                return Err(DelegationError::SessionEnded {
                    status: session.status.as_str(),
                    reason,
                });
            }
            SessionStatus::InProgress => {}
        }

        Ok(session)
    }

    fn emit(&self, lead_id: &LeadId, run_id: &RoutingRunId, kind: RoutingEventKind) {
        self.events.emit(RoutingEvent::now(lead_id.clone(), run_id.clone(), kind));
    }
}

fn remote_agent_id(bu_code: &str) -> String {
    format!("bu-{}", bu_code.to_lowercase())
}

const MAX_REMOTE_SKU_PROPOSALS: usize = 3;

/// Normalizes a remote SKU list to the shape the deterministic engine
/// persists: duplicate SKU ids dropped, at most three entries kept in remote
/// rank order, confidence clamped to [0, 1], ranks reassigned contiguously
/// from 1.
fn normalize_remote_skus(
    recommendation_id: &RecommendationId,
    proposals: &[RemoteSkuProposal],
) -> Vec<RecommendationSku> {
    let mut ordered: Vec<&RemoteSkuProposal> = proposals.iter().collect();
    ordered.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.bu_sku_id.cmp(&b.bu_sku_id)));

    let mut seen: Vec<&str> = Vec::new();
    let mut skus = Vec::new();
    for proposal in ordered {
        if skus.len() == MAX_REMOTE_SKU_PROPOSALS {
            break;
        }
        if seen.contains(&proposal.bu_sku_id.as_str()) {
            continue;
        }
        seen.push(proposal.bu_sku_id.as_str());
        skus.push(RecommendationSku {
            recommendation_id: recommendation_id.clone(),
            bu_sku_id: BuSkuId(proposal.bu_sku_id.clone()),
            rank: skus.len() as u32 + 1,
            confidence: proposal.confidence.clamp(0.0, 1.0),
            rationale: proposal.rationale.clone(),
        });
    }
    skus
}

/// Translates a remote final result into the same `RunOutcome` shape the
/// deterministic engine persists. Remote agent messages are attached to the
/// BU they address; unaddressed ones follow the first recommendation.
fn build_outcome(
    session: &DelegationSession,
    final_result: &FinalResult,
    agent_messages: &[RemoteAgentMessage],
) -> RunOutcome {
    let mut bu_outcomes: Vec<BuOutcome> = final_result
        .recommendations
        .iter()
        .map(|remote| {
            let recommendation = RoutingRecommendation {
                id: RecommendationId(Uuid::new_v4().to_string()),
                routing_run_id: session.routing_run_id.clone(),
                business_unit_id: BusinessUnitId(remote.business_unit_id.clone()),
                bu_code: remote.bu_code.clone(),
                role: RoutingRole::parse(&remote.role),
                rank: remote.rank,
                rule_score: remote.rule_score,
                final_score: remote.final_score,
                confidence: remote.confidence,
                reason_summary: remote.reason_summary.clone(),
            };
            let skus = normalize_remote_skus(&recommendation.id, &remote.sku_proposals);
            BuOutcome { recommendation, skus, logs: Vec::new() }
        })
        .collect();

    let session_evidence = EvidenceRef {
        kind: EvidenceKind::Remote,
        reference: session.id.0.clone(),
        detail: None,
    };
    for message in agent_messages {
        let entry = AgentLogEntry::new(
            session.routing_run_id.clone(),
            message.agent_id.clone(),
            message.recipient_id.clone(),
            AgentMessageType::parse(&message.message_type),
            message.content.clone(),
            vec![session_evidence.clone()],
        );
        let target = bu_outcomes.iter_mut().find(|bu| {
            let agent = remote_agent_id(&bu.recommendation.bu_code);
            message.agent_id == agent || message.recipient_id.as_deref() == Some(agent.as_str())
        });
        match target {
            Some(bu) => bu.logs.push(entry),
            None => {
                if let Some(first) = bu_outcomes.first_mut() {
                    first.logs.push(entry);
                }
            }
        }
    }

    let summary_log = final_result.summary.as_ref().map(|summary| {
        AgentLogEntry::new(
            session.routing_run_id.clone(),
            "router",
            None,
            AgentMessageType::RoutingSummary,
            summary.clone(),
            vec![session_evidence.clone()],
        )
    });

    RunOutcome {
        run_id: session.routing_run_id.clone(),
        lead_id: session.lead_id.clone(),
        bu_outcomes,
        summary_log,
    }
}
