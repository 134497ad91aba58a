//! Typed routing event vocabulary.
//!
//! Every observable moment of a routing run is one of these events. The
//! live stream and the persisted-run replay both speak this vocabulary, so
//! a consumer cannot tell a replayed run from a live one by shape alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::fact::LeadId;
use crate::domain::routing::RoutingRunId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoutingEvent {
    pub lead_id: LeadId,
    pub routing_run_id: RoutingRunId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RoutingEventKind,
}

impl RoutingEvent {
    pub fn now(lead_id: LeadId, routing_run_id: RoutingRunId, kind: RoutingEventKind) -> Self {
        Self { lead_id, routing_run_id, at: Utc::now(), kind }
    }
}

/// One proposed SKU inside a `SkuProposals` event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SkuProposalEvent {
    pub sku_code: String,
    pub rank: u32,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingEventKind {
    RoutingStarted {
        engine: String,
        fact_count: usize,
    },
    RecommendationSelected {
        bu_code: String,
        role: String,
        rank: u32,
        final_score: f64,
    },
    AgentTyping {
        agent_id: String,
    },
    AgentMessage {
        agent_id: String,
        message_type: String,
        content: String,
    },
    SkuProposals {
        bu_code: String,
        proposals: Vec<SkuProposalEvent>,
    },
    RoutingCompleted {
        primary_bu_code: Option<String>,
        recommendation_count: usize,
    },
    RoutingFailed {
        reason: String,
    },
    DelegationApprovalRequired {
        session_id: String,
        step_id: String,
        step_index: i64,
        subagent_name: String,
    },
    DelegationDecisionApplied {
        session_id: String,
        step_id: String,
        decision: String,
    },
    SessionPending {
        session_id: String,
        status: String,
    },
}

impl RoutingEventKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RoutingStarted { .. } => "ROUTING_STARTED",
            Self::RecommendationSelected { .. } => "RECOMMENDATION_SELECTED",
            Self::AgentTyping { .. } => "AGENT_TYPING",
            Self::AgentMessage { .. } => "AGENT_MESSAGE",
            Self::SkuProposals { .. } => "SKU_PROPOSALS",
            Self::RoutingCompleted { .. } => "ROUTING_COMPLETED",
            Self::RoutingFailed { .. } => "ROUTING_FAILED",
            Self::DelegationApprovalRequired { .. } => "DELEGATION_APPROVAL_REQUIRED",
            Self::DelegationDecisionApplied { .. } => "DELEGATION_DECISION_APPLIED",
            Self::SessionPending { .. } => "SESSION_PENDING",
        }
    }
}

/// Where emitted events go. The server wires a broadcast hub in; unit tests
/// capture events in memory; batch paths drop them.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RoutingEvent);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: RoutingEvent) {}
}

#[derive(Default)]
pub struct InMemoryEventSink {
    events: std::sync::Mutex<Vec<RoutingEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<RoutingEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn snapshot(&self) -> Vec<RoutingEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: RoutingEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventSink, InMemoryEventSink, RoutingEvent, RoutingEventKind, SkuProposalEvent};
    use crate::domain::fact::LeadId;
    use crate::domain::routing::RoutingRunId;

    fn event(kind: RoutingEventKind) -> RoutingEvent {
        RoutingEvent::now(LeadId("lead-1".to_string()), RoutingRunId("run-1".to_string()), kind)
    }

    #[test]
    fn events_serialize_with_a_flat_screaming_type_tag() {
        let json = serde_json::to_value(event(RoutingEventKind::RecommendationSelected {
            bu_code: "LIFTS".to_string(),
            role: "primary".to_string(),
            rank: 1,
            final_score: 0.91,
        }))
        .expect("serialize");

        assert_eq!(json["type"], "RECOMMENDATION_SELECTED");
        assert_eq!(json["bu_code"], "LIFTS");
        assert_eq!(json["lead_id"], "lead-1");
        assert_eq!(json["routing_run_id"], "run-1");
    }

    #[test]
    fn type_name_matches_the_serialized_tag() {
        let kinds = [
            RoutingEventKind::RoutingStarted {
                engine: "deterministic-v1".to_string(),
                fact_count: 4,
            },
            RoutingEventKind::AgentTyping { agent_id: "router".to_string() },
            RoutingEventKind::SkuProposals {
                bu_code: "LIFTS".to_string(),
                proposals: vec![SkuProposalEvent {
                    sku_code: "LIFT-STD".to_string(),
                    rank: 1,
                    confidence: 0.97,
                }],
            },
            RoutingEventKind::RoutingFailed { reason: "boom".to_string() },
            RoutingEventKind::SessionPending {
                session_id: "sess-1".to_string(),
                status: "pending_approval".to_string(),
            },
        ];
        for kind in kinds {
            let json = serde_json::to_value(event(kind.clone())).expect("serialize");
            assert_eq!(json["type"], kind.type_name());
        }
    }

    #[test]
    fn in_memory_sink_records_in_emission_order() {
        let sink = InMemoryEventSink::new();
        sink.emit(event(RoutingEventKind::RoutingStarted {
            engine: "deterministic-v1".to_string(),
            fact_count: 2,
        }));
        sink.emit(event(RoutingEventKind::RoutingCompleted {
            primary_bu_code: Some("LIFTS".to_string()),
            recommendation_count: 1,
        }));

        let events = sink.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind.type_name(), "ROUTING_STARTED");
        assert_eq!(events[1].kind.type_name(), "ROUTING_COMPLETED");
        assert!(sink.drain().is_empty());
    }
}
