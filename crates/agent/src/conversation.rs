//! BU conversation synthesis.
//!
//! Every ranked recommendation gets a two-message exchange: the router agent
//! hands the BU agent a fact summary, and the BU agent replies with its
//! proposal. The deterministic path below is always computed and is the
//! ground truth; an optional [`ConversationStrategy`] may refine the wording
//! and SKU ordering but can never widen the catalog or change scores.

use std::sync::Arc;

use leadroute_core::domain::agent_log::{AgentLogEntry, AgentMessageType, EvidenceRef};
use leadroute_core::domain::business_unit::{BuSku, BuSkuId};
use leadroute_core::domain::fact::FactMap;
use leadroute_core::domain::routing::RoutingRunId;
use leadroute_core::ranking::RankedBu;
use leadroute_core::scoring::round4;

use crate::strategy::{ConversationRequest, ConversationStrategy, SkuDraft};

pub const ROUTER_AGENT_ID: &str = "router";

const MIN_SKU_CONFIDENCE: f64 = 0.10;
const MAX_SKU_CONFIDENCE: f64 = 0.99;
const MAX_SKU_RELEVANCE: f64 = 0.98;
const MAX_SKU_PROPOSALS: usize = 3;

/// Facts whose values feed the per-BU intent boost.
const INTENT_FACT_KEYS: &[&str] = &["project_type", "project_stage", "development_type"];

/// Hand-tuned keyword hints per BU code. Unknown BUs fall back to the
/// cross-industry defaults.
const INTENT_HINTS: &[(&str, &[&str])] = &[
    ("LIFTS", &["residential", "commercial", "mixed_use", "high_rise", "tender"]),
    ("HVAC", &["commercial", "industrial", "office", "retail", "refurbishment"]),
    ("SAFETY", &["tender", "industrial", "public", "construction", "refurbishment"]),
];
const DEFAULT_INTENT_HINTS: &[&str] = &["tender", "commercial"];

#[derive(Clone, Debug, PartialEq)]
pub struct SkuProposal {
    pub bu_sku_id: BuSkuId,
    pub sku_code: String,
    pub rank: u32,
    pub confidence: f64,
    pub rationale: String,
}

/// The orchestrator's output for one ranked BU, always fully populated no
/// matter which path produced it.
#[derive(Clone, Debug)]
pub struct BuConversation {
    pub summary: String,
    pub sku_proposals: Vec<SkuProposal>,
    pub messages: Vec<AgentLogEntry>,
}

pub struct BuConversationInput<'a> {
    pub routing_run_id: &'a RoutingRunId,
    pub ranked: &'a RankedBu,
    pub available_skus: &'a [BuSku],
    pub facts: &'a FactMap,
}

#[derive(Default)]
pub struct BuOrchestrator {
    strategy: Option<Arc<dyn ConversationStrategy>>,
}

impl BuOrchestrator {
    pub fn deterministic() -> Self {
        Self { strategy: None }
    }

    pub fn with_strategy(strategy: Arc<dyn ConversationStrategy>) -> Self {
        Self { strategy: Some(strategy) }
    }

    /// Synthesizes the conversation for one ranked BU. Infallible: the
    /// deterministic path always yields a result and strategy failures are
    /// swallowed.
    pub async fn converse(&self, input: BuConversationInput<'_>) -> BuConversation {
        let score = &input.ranked.score;
        let (intent_boost, boost_reasons) = intent_boost(&score.bu_code, input.facts);
        let context_summary = fact_summary(input.facts);

        let deterministic_skus = propose_skus(
            input.available_skus,
            input.facts,
            &score.bu_code,
            score.final_score,
            intent_boost,
        );
        let deterministic_summary =
            deterministic_summary(score, deterministic_skus.len(), &boost_reasons);
        let deterministic_context = format!(
            "Routing context for {}: {}. Role {}, final score {:.4}.",
            score.bu_name,
            context_summary,
            input.ranked.role.as_str(),
            score.final_score,
        );

        let draft = match &self.strategy {
            Some(strategy) => {
                let request = ConversationRequest {
                    bu_code: &score.bu_code,
                    bu_name: &score.bu_name,
                    role: input.ranked.role,
                    final_score: score.final_score,
                    deterministic_reason: &score.reason_summary,
                    context_summary: &context_summary,
                    facts: input.facts,
                    available_skus: input.available_skus,
                };
                strategy.run_conversation(&request).await
            }
            None => None,
        };

        let (context_text, summary, sku_proposals) = match draft {
            Some(draft) => {
                let sanitized = sanitize_sku_drafts(&draft.sku_proposals, input.available_skus);
                let sku_proposals =
                    if sanitized.is_empty() { deterministic_skus } else { sanitized };
                let context_text = match draft.synergy_message.trim() {
                    "" => deterministic_context,
                    message => message.to_string(),
                };
                let summary = format!(
                    "{} Deterministic assessment: {}",
                    draft.bu_reply_summary.trim(),
                    score.reason_summary,
                );
                (context_text, summary, sku_proposals)
            }
            None => (deterministic_context, deterministic_summary, deterministic_skus),
        };

        let messages = message_pair(
            input.routing_run_id,
            &score.bu_code,
            &context_text,
            &summary,
            input.facts,
            score,
            &sku_proposals,
        );

        BuConversation { summary, sku_proposals, messages }
    }
}

pub fn bu_agent_id(bu_code: &str) -> String {
    format!("bu-{}", bu_code.to_lowercase())
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Keyword boost from the lead's intent facts, 0.1 per distinct hint hit,
/// capped at 0.3.
fn intent_boost(bu_code: &str, facts: &FactMap) -> (f64, Vec<String>) {
    let hints = INTENT_HINTS
        .iter()
        .find(|(code, _)| *code == bu_code)
        .map(|(_, hints)| *hints)
        .unwrap_or(DEFAULT_INTENT_HINTS);

    let mut boost: f64 = 0.0;
    let mut reasons = Vec::new();
    for hint in hints {
        for key in INTENT_FACT_KEYS {
            let hit = facts
                .get(*key)
                .map(|values| values.iter().any(|value| normalize(value) == *hint))
                .unwrap_or(false);
            if hit {
                boost += 0.1;
                reasons.push(format!("{key} matches {hint}"));
                break;
            }
        }
    }

    (round4(boost.min(0.3)), reasons)
}

/// Keyword relevance of one SKU to the lead, biased toward the owning BU and
/// capped below certainty.
fn sku_relevance(sku: &BuSku, facts: &FactMap, bu_code: &str) -> f64 {
    let haystack =
        format!("{} {} {}", sku.code, sku.name, sku.category).to_lowercase().replace('-', "_");

    let mut relevance: f64 = 0.5;
    if haystack.contains(&bu_code.to_lowercase()) {
        relevance += 0.1;
    }
    for key in INTENT_FACT_KEYS {
        if let Some(values) = facts.get(*key) {
            if values.iter().any(|value| haystack.contains(&normalize(value))) {
                relevance += 0.15;
            }
        }
    }

    round4(relevance.min(MAX_SKU_RELEVANCE))
}

fn propose_skus(
    available_skus: &[BuSku],
    facts: &FactMap,
    bu_code: &str,
    final_score: f64,
    intent_boost: f64,
) -> Vec<SkuProposal> {
    let mut scored: Vec<(f64, &BuSku)> = available_skus
        .iter()
        .map(|sku| {
            let relevance = sku_relevance(sku, facts, bu_code);
            let confidence = (final_score + 0.5 * intent_boost + 0.25 * relevance)
                .clamp(MIN_SKU_CONFIDENCE, MAX_SKU_CONFIDENCE);
            (round4(confidence), sku)
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.code.cmp(&b.1.code)));

    scored
        .into_iter()
        .take(MAX_SKU_PROPOSALS)
        .enumerate()
        .map(|(index, (confidence, sku))| SkuProposal {
            bu_sku_id: sku.id.clone(),
            sku_code: sku.code.clone(),
            rank: index as u32 + 1,
            confidence,
            rationale: format!("{} fits the extracted lead profile", sku.name),
        })
        .collect()
}

/// Enforces the catalog boundary on an LLM draft: unknown and repeated SKU
/// ids are dropped, the list is capped, confidences clamped to [0, 1], and
/// ranks reassigned contiguously.
fn sanitize_sku_drafts(drafts: &[SkuDraft], available_skus: &[BuSku]) -> Vec<SkuProposal> {
    let mut seen: Vec<&str> = Vec::new();
    let mut sanitized = Vec::new();

    for draft in drafts {
        if sanitized.len() == MAX_SKU_PROPOSALS {
            break;
        }
        if seen.contains(&draft.sku_id.as_str()) {
            continue;
        }
        let Some(sku) = available_skus.iter().find(|sku| sku.id.0 == draft.sku_id) else {
            continue;
        };
        seen.push(&draft.sku_id);

        let rationale = match draft.rationale.trim() {
            "" => format!("{} proposed by the conversation model", sku.name),
            rationale => rationale.to_string(),
        };
        sanitized.push(SkuProposal {
            bu_sku_id: sku.id.clone(),
            sku_code: sku.code.clone(),
            rank: sanitized.len() as u32 + 1,
            confidence: round4(draft.confidence.clamp(0.0, 1.0)),
            rationale,
        });
    }

    sanitized
}

fn fact_summary(facts: &FactMap) -> String {
    if facts.is_empty() {
        return "no extracted facts".to_string();
    }
    facts
        .iter()
        .map(|(key, values)| format!("{key}={}", values.join("|")))
        .collect::<Vec<_>>()
        .join(", ")
}

fn deterministic_summary(
    score: &leadroute_core::scoring::BuScore,
    sku_count: usize,
    boost_reasons: &[String],
) -> String {
    let mut summary = format!(
        "{} proposes {} SKU(s) for this lead. {}",
        score.bu_name, sku_count, score.reason_summary,
    );
    if !boost_reasons.is_empty() {
        summary.push_str(&format!(" Intent signals: {}.", boost_reasons.join(", ")));
    }
    summary
}

fn message_pair(
    routing_run_id: &RoutingRunId,
    bu_code: &str,
    context_text: &str,
    summary: &str,
    facts: &FactMap,
    score: &leadroute_core::scoring::BuScore,
    sku_proposals: &[SkuProposal],
) -> Vec<AgentLogEntry> {
    let bu_agent = bu_agent_id(bu_code);

    let mut context_evidence = Vec::new();
    for key in INTENT_FACT_KEYS {
        if let Some(values) = facts.get(*key) {
            for value in values {
                context_evidence.push(EvidenceRef::fact(key, value));
            }
        }
    }

    let mut proposal_evidence = vec![EvidenceRef::rule(&score.reason_summary)];
    proposal_evidence
        .extend(sku_proposals.iter().map(|proposal| EvidenceRef::sku(&proposal.bu_sku_id.0)));

    vec![
        AgentLogEntry::new(
            routing_run_id.clone(),
            ROUTER_AGENT_ID,
            Some(bu_agent.clone()),
            AgentMessageType::RoutingContext,
            context_text,
            context_evidence,
        ),
        AgentLogEntry::new(
            routing_run_id.clone(),
            bu_agent,
            Some(ROUTER_AGENT_ID.to_string()),
            AgentMessageType::BuProposal,
            summary,
            proposal_evidence,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use leadroute_core::domain::agent_log::AgentMessageType;
    use leadroute_core::domain::business_unit::{BuSku, BuSkuId, BusinessUnitId};
    use leadroute_core::domain::fact::FactMap;
    use leadroute_core::domain::routing::{RoutingRole, RoutingRunId};
    use leadroute_core::ranking::RankedBu;
    use leadroute_core::scoring::BuScore;

    use super::{sanitize_sku_drafts, BuConversationInput, BuOrchestrator};
    use crate::strategy::{ConversationDraft, ConversationRequest, ConversationStrategy, SkuDraft};

    fn facts() -> FactMap {
        let mut map = BTreeMap::new();
        map.insert("project_type".to_string(), vec!["residential".to_string()]);
        map.insert("project_stage".to_string(), vec!["tender".to_string()]);
        map.insert("building_floors".to_string(), vec!["12".to_string()]);
        map
    }

    fn sku(id: &str, code: &str, name: &str) -> BuSku {
        BuSku {
            id: BuSkuId(id.to_string()),
            business_unit_id: BusinessUnitId("bu-lifts-001".to_string()),
            code: code.to_string(),
            name: name.to_string(),
            category: "vertical-transport".to_string(),
        }
    }

    fn skus() -> Vec<BuSku> {
        vec![
            sku("sku-1", "LIFT-STD", "Standard passenger lift"),
            sku("sku-2", "LIFT-PAN", "Panoramic lift"),
            sku("sku-3", "ESC-COM", "Commercial escalator"),
            sku("sku-4", "LIFT-FRT", "Freight lift"),
        ]
    }

    fn ranked(final_score: f64) -> RankedBu {
        RankedBu {
            score: BuScore {
                business_unit_id: BusinessUnitId("bu-lifts-001".to_string()),
                bu_code: "LIFTS".to_string(),
                bu_name: "Lifts and Escalators".to_string(),
                matched_conditions: 3,
                total_conditions: 3,
                matched_required: 2,
                total_required: 2,
                missing_required_keys: Vec::new(),
                qualified: true,
                rule_score: final_score,
                final_score,
                confidence: final_score,
                reason_summary: "matched 3/3 conditions; required 2/2".to_string(),
            },
            role: RoutingRole::Primary,
            rank: 1,
        }
    }

    struct FixedStrategy(Option<ConversationDraft>);

    #[async_trait]
    impl ConversationStrategy for FixedStrategy {
        async fn run_conversation(
            &self,
            _request: &ConversationRequest<'_>,
        ) -> Option<ConversationDraft> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn deterministic_path_caps_proposals_at_three_contiguous_ranks() {
        let run_id = RoutingRunId("run-1".to_string());
        let facts = facts();
        let skus = skus();
        let ranked = ranked(1.0);

        let conversation = BuOrchestrator::deterministic()
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;

        assert_eq!(conversation.sku_proposals.len(), 3);
        let ranks: Vec<u32> =
            conversation.sku_proposals.iter().map(|proposal| proposal.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        for proposal in &conversation.sku_proposals {
            assert!(proposal.confidence >= 0.10 && proposal.confidence <= 0.99);
        }
    }

    #[tokio::test]
    async fn confidence_is_clamped_to_the_floor_for_weak_scores() {
        let run_id = RoutingRunId("run-2".to_string());
        let facts = FactMap::new();
        let skus = skus();
        let mut ranked = ranked(0.0);
        ranked.score.final_score = 0.0;

        let conversation = BuOrchestrator::deterministic()
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;

        // 0.0 + 0.25 * relevance stays above the 0.10 floor here, but never
        // above the base relevance contribution.
        for proposal in &conversation.sku_proposals {
            assert!(proposal.confidence >= 0.10);
            assert!(proposal.confidence <= 0.25);
        }
    }

    #[tokio::test]
    async fn message_pair_is_context_then_proposal() {
        let run_id = RoutingRunId("run-3".to_string());
        let facts = facts();
        let skus = skus();
        let ranked = ranked(0.8);

        let conversation = BuOrchestrator::deterministic()
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;

        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].message_type, AgentMessageType::RoutingContext);
        assert_eq!(conversation.messages[0].agent_id, "router");
        assert_eq!(conversation.messages[0].recipient_id.as_deref(), Some("bu-lifts"));
        assert_eq!(conversation.messages[1].message_type, AgentMessageType::BuProposal);
        assert_eq!(conversation.messages[1].agent_id, "bu-lifts");
        assert!(!conversation.messages[0].evidence_refs.is_empty());
    }

    #[tokio::test]
    async fn llm_draft_is_sanitized_and_reason_appended() {
        let run_id = RoutingRunId("run-4".to_string());
        let facts = facts();
        let skus = skus();
        let ranked = ranked(0.9);

        let draft = ConversationDraft {
            synergy_message: "Context from the model.".to_string(),
            bu_reply_summary: "Model reply.".to_string(),
            sku_proposals: vec![
                SkuDraft { sku_id: "sku-2".to_string(), confidence: 1.7, rationale: String::new() },
                SkuDraft {
                    sku_id: "sku-2".to_string(),
                    confidence: 0.5,
                    rationale: "dupe".to_string(),
                },
                SkuDraft {
                    sku_id: "sku-unknown".to_string(),
                    confidence: 0.9,
                    rationale: "ghost".to_string(),
                },
                SkuDraft {
                    sku_id: "sku-1".to_string(),
                    confidence: -0.2,
                    rationale: "ok".to_string(),
                },
            ],
        };
        let orchestrator = BuOrchestrator::with_strategy(Arc::new(FixedStrategy(Some(draft))));

        let conversation = orchestrator
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;

        assert_eq!(conversation.sku_proposals.len(), 2);
        assert_eq!(conversation.sku_proposals[0].bu_sku_id.0, "sku-2");
        assert_eq!(conversation.sku_proposals[0].confidence, 1.0);
        assert_eq!(conversation.sku_proposals[0].rank, 1);
        assert_eq!(conversation.sku_proposals[1].bu_sku_id.0, "sku-1");
        assert_eq!(conversation.sku_proposals[1].confidence, 0.0);
        assert_eq!(conversation.sku_proposals[1].rank, 2);
        assert!(conversation.summary.starts_with("Model reply."));
        assert!(conversation.summary.contains("matched 3/3 conditions"));
        assert_eq!(conversation.messages[0].content, "Context from the model.");
    }

    #[tokio::test]
    async fn empty_surviving_draft_falls_back_to_deterministic_skus() {
        let run_id = RoutingRunId("run-5".to_string());
        let facts = facts();
        let skus = skus();
        let ranked = ranked(0.9);

        let draft = ConversationDraft {
            synergy_message: String::new(),
            bu_reply_summary: "Only ghosts.".to_string(),
            sku_proposals: vec![SkuDraft {
                sku_id: "sku-unknown".to_string(),
                confidence: 0.9,
                rationale: "ghost".to_string(),
            }],
        };
        let orchestrator = BuOrchestrator::with_strategy(Arc::new(FixedStrategy(Some(draft))));

        let conversation = orchestrator
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;

        assert_eq!(conversation.sku_proposals.len(), 3);
        assert!(conversation
            .sku_proposals
            .iter()
            .all(|proposal| proposal.bu_sku_id.0 != "sku-unknown"));
    }

    #[tokio::test]
    async fn strategy_returning_none_uses_the_deterministic_output() {
        let run_id = RoutingRunId("run-6".to_string());
        let facts = facts();
        let skus = skus();
        let ranked = ranked(0.7);

        let with_strategy = BuOrchestrator::with_strategy(Arc::new(FixedStrategy(None)));
        let without = BuOrchestrator::deterministic();

        let a = with_strategy
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;
        let b = without
            .converse(BuConversationInput {
                routing_run_id: &run_id,
                ranked: &ranked,
                available_skus: &skus,
                facts: &facts,
            })
            .await;

        assert_eq!(a.summary, b.summary);
        assert_eq!(a.sku_proposals, b.sku_proposals);
    }

    #[test]
    fn sanitize_keeps_catalog_order_of_the_draft() {
        let skus = skus();
        let drafts = vec![
            SkuDraft { sku_id: "sku-3".to_string(), confidence: 0.4, rationale: "a".to_string() },
            SkuDraft { sku_id: "sku-1".to_string(), confidence: 0.9, rationale: "b".to_string() },
        ];

        let sanitized = sanitize_sku_drafts(&drafts, &skus);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized[0].bu_sku_id.0, "sku-3");
        assert_eq!(sanitized[0].rank, 1);
        assert_eq!(sanitized[1].bu_sku_id.0, "sku-1");
        assert_eq!(sanitized[1].rank, 2);
    }
}
