use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

/// A normalized (key, value, confidence) datum extracted from a lead
/// document. Multiple values per key are allowed; facts are immutable for a
/// given extraction pass and superseded by delete-and-reinsert.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub lead_id: LeadId,
    pub fact_key: String,
    pub fact_value: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Lead facts grouped by key, preserving value order within a key.
pub type FactMap = BTreeMap<String, Vec<String>>;

pub fn group_facts(facts: &[Fact]) -> FactMap {
    let mut grouped = FactMap::new();
    for fact in facts {
        grouped.entry(fact.fact_key.clone()).or_default().push(fact.fact_value.clone());
    }
    grouped
}

/// The lead record proper. Fact extraction happens upstream; here the lead
/// only carries its identity and routing lifecycle marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub source: String,
    pub routing_state: LeadRoutingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(id: LeadId, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source: source.into(),
            routing_state: LeadRoutingState::New,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Routing lifecycle markers stamped onto the lead record itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadRoutingState {
    New,
    Routed,
    RoutingPendingApproval,
    RoutingFailed,
}

impl LeadRoutingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Routed => "routed",
            Self::RoutingPendingApproval => "routing_pending_approval",
            Self::RoutingFailed => "routing_failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "routed" => Self::Routed,
            "routing_pending_approval" => Self::RoutingPendingApproval,
            "routing_failed" => Self::RoutingFailed,
            _ => Self::New,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{group_facts, Fact, LeadId, LeadRoutingState};

    fn fact(key: &str, value: &str) -> Fact {
        Fact {
            lead_id: LeadId("lead-1".to_string()),
            fact_key: key.to_string(),
            fact_value: value.to_string(),
            confidence: 0.9,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn grouping_preserves_value_order_within_a_key() {
        let facts = vec![
            fact("region", "north"),
            fact("project_type", "residential"),
            fact("region", "west"),
        ];

        let grouped = group_facts(&facts);
        assert_eq!(grouped["region"], vec!["north".to_string(), "west".to_string()]);
        assert_eq!(grouped["project_type"], vec!["residential".to_string()]);
    }

    #[test]
    fn routing_state_round_trips_through_storage_strings() {
        for state in [
            LeadRoutingState::New,
            LeadRoutingState::Routed,
            LeadRoutingState::RoutingPendingApproval,
            LeadRoutingState::RoutingFailed,
        ] {
            assert_eq!(LeadRoutingState::parse(state.as_str()), state);
        }
    }
}
