use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::routing::RoutingRunId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentMessageType {
    RoutingContext,
    BuProposal,
    RoutingSummary,
    DelegationUpdate,
}

impl AgentMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoutingContext => "ROUTING_CONTEXT",
            Self::BuProposal => "BU_PROPOSAL",
            Self::RoutingSummary => "ROUTING_SUMMARY",
            Self::DelegationUpdate => "DELEGATION_UPDATE",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ROUTING_CONTEXT" => Self::RoutingContext,
            "BU_PROPOSAL" => Self::BuProposal,
            "ROUTING_SUMMARY" => Self::RoutingSummary,
            _ => Self::DelegationUpdate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Fact,
    Rule,
    Sku,
    Remote,
}

/// Typed pointer from a conversation message back to the datum that produced
/// it, kept structured so persistence and replay stay deterministic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub kind: EvidenceKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl EvidenceRef {
    pub fn fact(key: &str, value: &str) -> Self {
        Self {
            kind: EvidenceKind::Fact,
            reference: key.to_string(),
            detail: Some(value.to_string()),
        }
    }

    pub fn rule(summary: &str) -> Self {
        Self { kind: EvidenceKind::Rule, reference: summary.to_string(), detail: None }
    }

    pub fn sku(sku_id: &str) -> Self {
        Self { kind: EvidenceKind::Sku, reference: sku_id.to_string(), detail: None }
    }
}

/// Append-only audit record of the synthesized or LLM-produced conversation.
/// Ordering is creation-time ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub id: String,
    pub routing_run_id: RoutingRunId,
    pub agent_id: String,
    pub recipient_id: Option<String>,
    pub message_type: AgentMessageType,
    pub content: String,
    pub evidence_refs: Vec<EvidenceRef>,
    pub created_at: DateTime<Utc>,
}

impl AgentLogEntry {
    pub fn new(
        routing_run_id: RoutingRunId,
        agent_id: impl Into<String>,
        recipient_id: Option<String>,
        message_type: AgentMessageType,
        content: impl Into<String>,
        evidence_refs: Vec<EvidenceRef>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            routing_run_id,
            agent_id: agent_id.into(),
            recipient_id,
            message_type,
            content: content.into(),
            evidence_refs,
            created_at: Utc::now(),
        }
    }
}
