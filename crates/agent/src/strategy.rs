//! Optional LLM conversation path.
//!
//! The strategy is advisory only: it may refine the synthesized message pair
//! and SKU proposals, but any failure collapses to `None` and the caller uses
//! the deterministic output unchanged. The model never invents SKUs the
//! catalog does not contain and never decides scores or routing outcomes.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use leadroute_core::domain::business_unit::BuSku;
use leadroute_core::domain::fact::FactMap;
use leadroute_core::domain::routing::RoutingRole;

use crate::llm::LlmClient;

pub struct ConversationRequest<'a> {
    pub bu_code: &'a str,
    pub bu_name: &'a str,
    pub role: RoutingRole,
    pub final_score: f64,
    pub deterministic_reason: &'a str,
    pub context_summary: &'a str,
    pub facts: &'a FactMap,
    pub available_skus: &'a [BuSku],
}

/// Raw draft as the model returns it, before sanitization.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDraft {
    pub synergy_message: String,
    pub bu_reply_summary: String,
    #[serde(default)]
    pub sku_proposals: Vec<SkuDraft>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkuDraft {
    pub sku_id: String,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

#[async_trait]
pub trait ConversationStrategy: Send + Sync {
    /// Never errors toward the caller: anything short of a valid draft is
    /// `None` and the deterministic path wins.
    async fn run_conversation(&self, request: &ConversationRequest<'_>)
        -> Option<ConversationDraft>;
}

const SYSTEM_PROMPT: &str = "You are a routing assistant for a construction-industry \
lead desk. Reply with a single JSON object and nothing else: \
{\"synergyMessage\": string, \"buReplySummary\": string, \
\"skuProposals\": [{\"skuId\": string, \"confidence\": number between 0 and 1, \
\"rationale\": string}]}. Propose at most 3 SKUs and only SKU ids listed in the \
request. Do not change scores and do not invent facts.";

pub struct LlmConversationStrategy {
    client: Arc<dyn LlmClient>,
}

impl LlmConversationStrategy {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn user_prompt(request: &ConversationRequest<'_>) -> String {
        let facts: Vec<String> = request
            .facts
            .iter()
            .map(|(key, values)| format!("{key}={}", values.join("|")))
            .collect();
        let skus: Vec<String> = request
            .available_skus
            .iter()
            .map(|sku| format!("{} ({}, {}, {})", sku.id.0, sku.code, sku.name, sku.category))
            .collect();

        format!(
            "Business unit: {} ({})\nRole: {}\nDeterministic score: {:.4}\n\
             Deterministic reason: {}\nContext: {}\nLead facts: {}\nAvailable SKUs: {}",
            request.bu_code,
            request.bu_name,
            request.role.as_str(),
            request.final_score,
            request.deterministic_reason,
            request.context_summary,
            facts.join(", "),
            skus.join("; "),
        )
    }
}

#[async_trait]
impl ConversationStrategy for LlmConversationStrategy {
    async fn run_conversation(
        &self,
        request: &ConversationRequest<'_>,
    ) -> Option<ConversationDraft> {
        let user_prompt = Self::user_prompt(request);
        let raw = match self.client.complete(SYSTEM_PROMPT, &user_prompt).await {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(bu_code = request.bu_code, %error, "LLM conversation failed");
                return None;
            }
        };

        match parse_draft(&raw) {
            Some(draft) if !draft.bu_reply_summary.trim().is_empty() => Some(draft),
            _ => {
                tracing::warn!(bu_code = request.bu_code, "LLM returned an unusable draft");
                None
            }
        }
    }
}

/// Tolerates markdown code fences around the JSON body; anything else that
/// fails the schema is discarded.
fn parse_draft(raw: &str) -> Option<ConversationDraft> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::parse_draft;

    #[test]
    fn parses_a_plain_json_draft() {
        let draft = parse_draft(
            r#"{"synergyMessage": "ctx", "buReplySummary": "reply",
               "skuProposals": [{"skuId": "sku-1", "confidence": 0.8, "rationale": "fits"}]}"#,
        )
        .expect("valid draft");
        assert_eq!(draft.sku_proposals.len(), 1);
        assert_eq!(draft.sku_proposals[0].sku_id, "sku-1");
    }

    #[test]
    fn strips_markdown_fences() {
        let draft = parse_draft(
            "```json\n{\"synergyMessage\": \"a\", \"buReplySummary\": \"b\"}\n```",
        )
        .expect("fenced draft");
        assert_eq!(draft.bu_reply_summary, "b");
        assert!(draft.sku_proposals.is_empty());
    }

    #[test]
    fn schema_violations_yield_none() {
        assert!(parse_draft("not json at all").is_none());
        assert!(parse_draft(r#"{"synergyMessage": 42}"#).is_none());
    }
}
