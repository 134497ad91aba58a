//! Deterministic routing pipeline.
//!
//! One call scores the lead against every active rule set, ranks the
//! qualified business units, synthesizes a conversation per ranked BU, and
//! lands the whole outcome in a single transaction. Events are emitted as
//! each step happens so a subscribed client watches the run unfold live;
//! emission goes through an infallible sink and can never abort the run.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use leadroute_agent::{BuConversationInput, BuOrchestrator, ROUTER_AGENT_ID};
use leadroute_core::config::RoutingConfig;
use leadroute_core::domain::agent_log::{AgentLogEntry, AgentMessageType, EvidenceRef};
use leadroute_core::domain::fact::{group_facts, LeadId};
use leadroute_core::domain::routing::{
    RecommendationId, RecommendationSku, RoutingRecommendation, RoutingRun, RoutingRunId,
};
use leadroute_core::events::{EventSink, RoutingEvent, RoutingEventKind, SkuProposalEvent};
use leadroute_core::ranking::{rank_recommendations, RankedBu, RankingOptions};
use leadroute_core::scoring::{score_business_units, ENGINE_VERSION};
use leadroute_db::repositories::{
    BuOutcome, BusinessUnitRepository, FactRepository, LeadRepository, RepositoryError,
    RuleSetRepository, RunOutcome, SqlBusinessUnitRepository, SqlFactRepository, SqlLeadRepository,
    SqlRoutingStore, SqlRuleSetRepository,
};
use leadroute_db::DbPool;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("lead {0} not found")]
    LeadNotFound(String),
}

pub struct RoutingCoordinator {
    pool: DbPool,
    orchestrator: BuOrchestrator,
    events: Arc<dyn EventSink>,
    ranking_options: RankingOptions,
    step_pacing: Duration,
}

impl RoutingCoordinator {
    pub fn new(
        pool: DbPool,
        orchestrator: BuOrchestrator,
        events: Arc<dyn EventSink>,
        config: &RoutingConfig,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            events,
            ranking_options: RankingOptions {
                max_cross_sell: config.max_cross_sell,
                min_cross_sell_score: config.min_cross_sell_score,
            },
            step_pacing: Duration::from_millis(config.step_pacing_ms),
        }
    }

    /// Runs the full pipeline for one lead. Any failure after the run row
    /// exists marks the run FAILED and the lead routing_failed before the
    /// error is returned.
    pub async fn route_lead(&self, lead_id: &LeadId) -> Result<RunOutcome, RoutingError> {
        let leads = SqlLeadRepository::new(self.pool.clone());
        if leads.find_by_id(lead_id).await?.is_none() {
            return Err(RoutingError::LeadNotFound(lead_id.0.clone()));
        }

        let store = SqlRoutingStore::new(self.pool.clone());
        let run = RoutingRun::new(lead_id.clone(), ENGINE_VERSION);
        store.create_run(&run).await?;

        match self.execute(lead_id, &run.id).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let reason = error.to_string();
                if let Err(mark_error) = store.mark_run_failed(&run.id, lead_id, &reason).await {
                    warn!(
                        event_name = "routing.run.fail_mark_error",
                        correlation_id = %run.id.0,
                        lead_id = %lead_id.0,
                        error = %mark_error,
                        "could not mark failed run"
                    );
                }
                self.emit(lead_id, &run.id, RoutingEventKind::RoutingFailed { reason });
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        lead_id: &LeadId,
        run_id: &RoutingRunId,
    ) -> Result<RunOutcome, RoutingError> {
        let facts = SqlFactRepository::new(self.pool.clone()).facts_for_lead(lead_id).await?;
        let fact_map = group_facts(&facts);
        self.emit(
            lead_id,
            run_id,
            RoutingEventKind::RoutingStarted {
                engine: ENGINE_VERSION.to_string(),
                fact_count: facts.len(),
            },
        );

        let rule_sets =
            SqlRuleSetRepository::new(self.pool.clone()).latest_active_rule_sets().await?;
        let scores = score_business_units(&fact_map, &rule_sets);
        let ranked = rank_recommendations(&scores, self.ranking_options);

        info!(
            event_name = "routing.run.ranked",
            correlation_id = %run_id.0,
            lead_id = %lead_id.0,
            scored_units = scores.len(),
            recommendation_count = ranked.len(),
            "ranked business units for lead"
        );

        let units = SqlBusinessUnitRepository::new(self.pool.clone());
        let mut bu_outcomes = Vec::new();
        for entry in &ranked {
            self.emit(
                lead_id,
                run_id,
                RoutingEventKind::RecommendationSelected {
                    bu_code: entry.score.bu_code.clone(),
                    role: entry.role.as_str().to_string(),
                    rank: entry.rank,
                    final_score: entry.score.final_score,
                },
            );
            self.pace().await;

            let available_skus = units.skus_for_unit(&entry.score.business_unit_id).await?;
            let conversation = self
                .orchestrator
                .converse(BuConversationInput {
                    routing_run_id: run_id,
                    ranked: entry,
                    available_skus: &available_skus,
                    facts: &fact_map,
                })
                .await;

            for message in &conversation.messages {
                self.emit(
                    lead_id,
                    run_id,
                    RoutingEventKind::AgentTyping { agent_id: message.agent_id.clone() },
                );
                self.pace().await;
                self.emit(
                    lead_id,
                    run_id,
                    RoutingEventKind::AgentMessage {
                        agent_id: message.agent_id.clone(),
                        message_type: message.message_type.as_str().to_string(),
                        content: message.content.clone(),
                    },
                );
            }

            if !conversation.sku_proposals.is_empty() {
                self.emit(
                    lead_id,
                    run_id,
                    RoutingEventKind::SkuProposals {
                        bu_code: entry.score.bu_code.clone(),
                        proposals: conversation
                            .sku_proposals
                            .iter()
                            .map(|proposal| SkuProposalEvent {
                                sku_code: proposal.sku_code.clone(),
                                rank: proposal.rank,
                                confidence: proposal.confidence,
                            })
                            .collect(),
                    },
                );
                self.pace().await;
            }

            let recommendation = RoutingRecommendation {
                id: RecommendationId(uuid::Uuid::new_v4().to_string()),
                routing_run_id: run_id.clone(),
                business_unit_id: entry.score.business_unit_id.clone(),
                bu_code: entry.score.bu_code.clone(),
                role: entry.role,
                rank: entry.rank,
                rule_score: entry.score.rule_score,
                final_score: entry.score.final_score,
                confidence: entry.score.confidence,
                reason_summary: entry.score.reason_summary.clone(),
            };
            let skus = conversation
                .sku_proposals
                .iter()
                .map(|proposal| RecommendationSku {
                    recommendation_id: recommendation.id.clone(),
                    bu_sku_id: proposal.bu_sku_id.clone(),
                    rank: proposal.rank,
                    confidence: proposal.confidence,
                    rationale: proposal.rationale.clone(),
                })
                .collect();

            bu_outcomes.push(BuOutcome { recommendation, skus, logs: conversation.messages });
        }

        let outcome = RunOutcome {
            run_id: run_id.clone(),
            lead_id: lead_id.clone(),
            bu_outcomes,
            summary_log: Some(summary_log(run_id, &ranked)),
        };
        SqlRoutingStore::new(self.pool.clone()).persist_run_outcome(&outcome).await?;

        self.emit(
            lead_id,
            run_id,
            RoutingEventKind::RoutingCompleted {
                primary_bu_code: ranked.first().map(|entry| entry.score.bu_code.clone()),
                recommendation_count: ranked.len(),
            },
        );
        info!(
            event_name = "routing.run.completed",
            correlation_id = %run_id.0,
            lead_id = %lead_id.0,
            recommendation_count = ranked.len(),
            "routing run completed"
        );

        Ok(outcome)
    }

    async fn pace(&self) {
        if !self.step_pacing.is_zero() {
            tokio::time::sleep(self.step_pacing).await;
        }
    }

    fn emit(&self, lead_id: &LeadId, run_id: &RoutingRunId, kind: RoutingEventKind) {
        self.events.emit(RoutingEvent::now(lead_id.clone(), run_id.clone(), kind));
    }
}

fn summary_log(run_id: &RoutingRunId, ranked: &[RankedBu]) -> AgentLogEntry {
    let content = match ranked.split_first() {
        None => "No business unit qualified for this lead.".to_string(),
        Some((primary, rest)) => {
            let mut content = format!(
                "Routed to {} as primary (final score {:.4}).",
                primary.score.bu_code, primary.score.final_score,
            );
            if !rest.is_empty() {
                let cross_sell: Vec<&str> =
                    rest.iter().map(|entry| entry.score.bu_code.as_str()).collect();
                content.push_str(&format!(" Cross-sell: {}.", cross_sell.join(", ")));
            }
            content
        }
    };

    let evidence =
        ranked.iter().map(|entry| EvidenceRef::rule(&entry.score.reason_summary)).collect();

    AgentLogEntry::new(
        run_id.clone(),
        ROUTER_AGENT_ID,
        None,
        AgentMessageType::RoutingSummary,
        content,
        evidence,
    )
}
