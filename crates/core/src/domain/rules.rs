use serde::{Deserialize, Serialize};

use crate::domain::business_unit::BusinessUnitId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleSetId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
    Eq,
    In,
    NotIn,
    Exists,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RuleOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Exists => "exists",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "in" => Some(Self::In),
            "not_in" => Some(Self::NotIn),
            "exists" => Some(Self::Exists),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            _ => None,
        }
    }
}

/// One weighted matching criterion inside a rule set version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub fact_key: String,
    pub operator: RuleOperator,
    pub comparison_value: Option<String>,
    pub comparison_values: Vec<String>,
    pub weight: f64,
    pub is_required: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSetStatus {
    Draft,
    Active,
    Retired,
}

impl RuleSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "active" => Self::Active,
            "retired" => Self::Retired,
            _ => Self::Draft,
        }
    }
}

/// A versioned, immutable rule set for one business unit. Only the
/// highest-version ACTIVE set per BU is eligible for scoring; rule changes
/// always land as new versions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: RuleSetId,
    pub business_unit_id: BusinessUnitId,
    pub bu_code: String,
    pub bu_name: String,
    pub version: i64,
    pub status: RuleSetStatus,
    pub conditions: Vec<RuleCondition>,
}

#[cfg(test)]
mod tests {
    use super::RuleOperator;

    #[test]
    fn operator_round_trips_through_storage_strings() {
        for operator in [
            RuleOperator::Eq,
            RuleOperator::In,
            RuleOperator::NotIn,
            RuleOperator::Exists,
            RuleOperator::Gt,
            RuleOperator::Gte,
            RuleOperator::Lt,
            RuleOperator::Lte,
        ] {
            assert_eq!(RuleOperator::parse(operator.as_str()), Some(operator));
        }
        assert_eq!(RuleOperator::parse("between"), None);
    }
}
