//! Deterministic fact-scoring engine.
//!
//! Scores every business unit's rule set against a lead's extracted facts.
//! Pure and order-preserving: identical inputs always produce identical
//! scores, and output order mirrors rule-set input order.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::business_unit::BusinessUnitId;
use crate::domain::fact::FactMap;
use crate::domain::rules::{RuleCondition, RuleOperator, RuleSet};

pub const ENGINE_VERSION: &str = "deterministic-v1";

/// Computed score of one BU rule set against one lead. Not persisted as-is;
/// ranked entries become routing recommendations.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BuScore {
    pub business_unit_id: BusinessUnitId,
    pub bu_code: String,
    pub bu_name: String,
    pub matched_conditions: u32,
    pub total_conditions: u32,
    pub matched_required: u32,
    pub total_required: u32,
    pub missing_required_keys: Vec<String>,
    pub qualified: bool,
    pub rule_score: f64,
    pub final_score: f64,
    pub confidence: f64,
    pub reason_summary: String,
}

pub fn score_business_units(facts: &FactMap, rule_sets: &[RuleSet]) -> Vec<BuScore> {
    rule_sets.iter().map(|rule_set| score_rule_set(facts, rule_set)).collect()
}

fn score_rule_set(facts: &FactMap, rule_set: &RuleSet) -> BuScore {
    let mut matched_weight = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let mut matched_conditions = 0_u32;
    let mut matched_required = 0_u32;
    let mut total_required = 0_u32;
    let mut missing_required_keys: Vec<String> = Vec::new();

    for condition in &rule_set.conditions {
        // Malformed negative weights are clamped, never rejected.
        let weight = condition.weight.max(0.0);
        total_weight += weight;

        let matched = condition_matches(facts, condition);
        if matched {
            matched_weight += weight;
            matched_conditions += 1;
        }

        if condition.is_required {
            total_required += 1;
            if matched {
                matched_required += 1;
            } else if !missing_required_keys.contains(&condition.fact_key) {
                missing_required_keys.push(condition.fact_key.clone());
            }
        }
    }

    let rule_score = if total_weight > 0.0 { matched_weight / total_weight } else { 0.0 };
    let qualified = missing_required_keys.is_empty();
    let final_score = if qualified { rule_score } else { 0.0 };
    let required_ratio = if total_required > 0 {
        f64::from(matched_required) / f64::from(total_required)
    } else {
        1.0
    };
    let confidence =
        if qualified { (rule_score + required_ratio) / 2.0 } else { required_ratio * 0.25 };

    let total_conditions = rule_set.conditions.len() as u32;
    let reason_summary = build_reason_summary(
        matched_conditions,
        total_conditions,
        matched_required,
        total_required,
        &missing_required_keys,
    );

    BuScore {
        business_unit_id: rule_set.business_unit_id.clone(),
        bu_code: rule_set.bu_code.clone(),
        bu_name: rule_set.bu_name.clone(),
        matched_conditions,
        total_conditions,
        matched_required,
        total_required,
        missing_required_keys,
        qualified,
        rule_score: round4(rule_score),
        final_score: round4(final_score),
        confidence: round4(confidence),
        reason_summary,
    }
}

fn build_reason_summary(
    matched: u32,
    total: u32,
    matched_required: u32,
    total_required: u32,
    missing_required_keys: &[String],
) -> String {
    let mut summary =
        format!("matched {matched}/{total} conditions; required {matched_required}/{total_required}");
    if !missing_required_keys.is_empty() {
        summary.push_str("; missing required: ");
        summary.push_str(&missing_required_keys.join(", "));
    }
    summary
}

fn condition_matches(facts: &FactMap, condition: &RuleCondition) -> bool {
    let values: &[String] =
        facts.get(&condition.fact_key).map(Vec::as_slice).unwrap_or(&[]);

    match condition.operator {
        RuleOperator::Exists => !values.is_empty(),
        RuleOperator::Eq => match condition.comparison_value.as_deref() {
            Some(comparison) => {
                let comparison = normalize(comparison);
                values.iter().any(|value| normalize(value) == comparison)
            }
            None => false,
        },
        RuleOperator::In => {
            let comparison_set = normalized_set(&condition.comparison_values);
            values.iter().any(|value| comparison_set.contains(&normalize(value)))
        }
        RuleOperator::NotIn => {
            // Total absence of the fact does NOT satisfy NOT_IN: the lead
            // must carry at least one value, and every value must differ.
            if values.is_empty() {
                return false;
            }
            let comparison_set = normalized_set(&condition.comparison_values);
            values.iter().all(|value| !comparison_set.contains(&normalize(value)))
        }
        RuleOperator::Gt | RuleOperator::Gte | RuleOperator::Lt | RuleOperator::Lte => {
            let Some(threshold) = condition.comparison_value.as_deref().and_then(parse_number)
            else {
                return false;
            };
            values.iter().filter_map(|value| parse_number(value)).any(|number| {
                match condition.operator {
                    RuleOperator::Gt => number > threshold,
                    RuleOperator::Gte => number >= threshold,
                    RuleOperator::Lt => number < threshold,
                    _ => number <= threshold,
                }
            })
        }
    }
}

fn normalized_set(values: &[String]) -> BTreeSet<String> {
    values.iter().map(|value| normalize(value)).collect()
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Numeric fact values may carry thousands separators ("1,200", "12 000").
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String =
        raw.trim().chars().filter(|ch| !matches!(ch, ',' | '_' | ' ')).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Round to 4 decimal places, half up. Scores are non-negative, so
/// half-away-from-zero rounding is half-up here.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{round4, score_business_units, BuScore};
    use crate::domain::business_unit::BusinessUnitId;
    use crate::domain::fact::FactMap;
    use crate::domain::rules::{
        RuleCondition, RuleOperator, RuleSet, RuleSetId, RuleSetStatus,
    };

    fn rule_set(bu_code: &str, conditions: Vec<RuleCondition>) -> RuleSet {
        RuleSet {
            id: RuleSetId(format!("rs-{bu_code}")),
            business_unit_id: BusinessUnitId(format!("bu-{bu_code}")),
            bu_code: bu_code.to_string(),
            bu_name: format!("{bu_code} unit"),
            version: 1,
            status: RuleSetStatus::Active,
            conditions,
        }
    }

    fn condition(
        fact_key: &str,
        operator: RuleOperator,
        comparison_value: Option<&str>,
        comparison_values: &[&str],
        weight: f64,
        is_required: bool,
    ) -> RuleCondition {
        RuleCondition {
            fact_key: fact_key.to_string(),
            operator,
            comparison_value: comparison_value.map(str::to_string),
            comparison_values: comparison_values.iter().map(|v| v.to_string()).collect(),
            weight,
            is_required,
        }
    }

    fn facts(entries: &[(&str, &str)]) -> FactMap {
        let mut map: FactMap = BTreeMap::new();
        for (key, value) in entries {
            map.entry(key.to_string()).or_default().push(value.to_string());
        }
        map
    }

    #[test]
    fn fully_matching_rule_set_scores_one() {
        let rule_sets = vec![rule_set(
            "LIFTS",
            vec![
                condition(
                    "project_type",
                    RuleOperator::In,
                    None,
                    &["residential", "commercial"],
                    0.4,
                    true,
                ),
                condition("project_stage", RuleOperator::Eq, Some("tender"), &[], 0.3, true),
                condition(
                    "construction_start_year",
                    RuleOperator::Gte,
                    Some("2025"),
                    &[],
                    0.3,
                    false,
                ),
            ],
        )];
        let facts = facts(&[
            ("project_type", "residential"),
            ("project_stage", "tender"),
            ("construction_start_year", "2026"),
        ]);

        let scores = score_business_units(&facts, &rule_sets);
        assert_eq!(scores.len(), 1);
        let score = &scores[0];
        assert_eq!(score.rule_score, 1.0);
        assert_eq!(score.final_score, 1.0);
        assert_eq!(score.matched_required, 2);
        assert!(score.missing_required_keys.is_empty());
        assert!(score.qualified);
        assert_eq!(score.confidence, 1.0);
    }

    #[test]
    fn missing_required_condition_disqualifies_regardless_of_optionals() {
        let rule_sets = vec![rule_set(
            "HVAC",
            vec![
                condition("project_type", RuleOperator::Eq, Some("industrial"), &[], 0.5, true),
                condition("region", RuleOperator::Exists, None, &[], 0.5, true),
            ],
        )];
        let facts = facts(&[("project_type", "industrial")]);

        let score = &score_business_units(&facts, &rule_sets)[0];
        assert!(!score.qualified);
        assert_eq!(score.final_score, 0.0);
        assert_eq!(score.missing_required_keys, vec!["region".to_string()]);
        assert_eq!(score.matched_required, 1);
        assert_eq!(score.total_required, 2);
        // required_ratio 0.5 * 0.25
        assert_eq!(score.confidence, 0.125);
        assert!(score.reason_summary.contains("missing required: region"));
    }

    #[test]
    fn not_in_is_not_satisfied_by_total_absence_of_the_fact() {
        let rule_sets = vec![rule_set(
            "SAFE",
            vec![condition(
                "region",
                RuleOperator::NotIn,
                None,
                &["offshore", "export"],
                1.0,
                false,
            )],
        )];

        let absent = score_business_units(&facts(&[]), &rule_sets);
        assert_eq!(absent[0].matched_conditions, 0, "absent fact must not satisfy NOT_IN");

        let differs = score_business_units(&facts(&[("region", "North")]), &rule_sets);
        assert_eq!(differs[0].matched_conditions, 1);

        let listed = score_business_units(&facts(&[("region", "OFFSHORE ")]), &rule_sets);
        assert_eq!(listed[0].matched_conditions, 0);
    }

    #[test]
    fn comparisons_are_case_insensitive_and_trimmed() {
        let rule_sets = vec![rule_set(
            "LIFTS",
            vec![condition("project_stage", RuleOperator::Eq, Some("Tender"), &[], 1.0, true)],
        )];
        let score = &score_business_units(&facts(&[("project_stage", "  TENDER ")]), &rule_sets)[0];
        assert!(score.qualified);
        assert_eq!(score.final_score, 1.0);
    }

    #[test]
    fn numeric_operators_strip_thousands_separators_and_never_error() {
        let rule_sets = vec![rule_set(
            "HVAC",
            vec![
                condition("floor_area_sqm", RuleOperator::Gte, Some("10,000"), &[], 0.5, false),
                condition("budget_eur", RuleOperator::Lt, Some("2_000_000"), &[], 0.5, false),
            ],
        )];
        let score = &score_business_units(
            &facts(&[("floor_area_sqm", "12 500"), ("budget_eur", "not-a-number")]),
            &rule_sets,
        )[0];

        assert_eq!(score.matched_conditions, 1);
        assert_eq!(score.rule_score, 0.5);
    }

    #[test]
    fn any_value_of_a_multi_valued_fact_can_match() {
        let rule_sets = vec![rule_set(
            "LIFTS",
            vec![condition(
                "project_type",
                RuleOperator::In,
                None,
                &["commercial"],
                1.0,
                true,
            )],
        )];
        let mut map: FactMap = BTreeMap::new();
        map.insert(
            "project_type".to_string(),
            vec!["residential".to_string(), "commercial".to_string()],
        );

        let score = &score_business_units(&map, &rule_sets)[0];
        assert!(score.qualified);
    }

    #[test]
    fn negative_weights_are_clamped_to_zero() {
        let rule_sets = vec![rule_set(
            "SAFE",
            vec![
                condition("region", RuleOperator::Exists, None, &[], -3.0, false),
                condition("project_stage", RuleOperator::Eq, Some("tender"), &[], 1.0, false),
            ],
        )];
        let score = &score_business_units(
            &facts(&[("region", "north"), ("project_stage", "tender")]),
            &rule_sets,
        )[0];

        // The negative weight contributes nothing to either side of the ratio.
        assert_eq!(score.rule_score, 1.0);
        assert_eq!(score.matched_conditions, 2);
    }

    #[test]
    fn zero_total_weight_yields_zero_rule_score() {
        let rule_sets = vec![rule_set(
            "SAFE",
            vec![condition("region", RuleOperator::Exists, None, &[], 0.0, false)],
        )];
        let score = &score_business_units(&facts(&[("region", "north")]), &rule_sets)[0];
        assert_eq!(score.rule_score, 0.0);
        assert_eq!(score.final_score, 0.0);
        assert!(score.qualified);
    }

    #[test]
    fn scoring_is_pure_and_mirrors_input_order() {
        let lifts = rule_set(
            "LIFTS",
            vec![condition("project_type", RuleOperator::Eq, Some("residential"), &[], 1.0, false)],
        );
        let hvac = rule_set(
            "HVAC",
            vec![condition("region", RuleOperator::Exists, None, &[], 1.0, false)],
        );
        let facts = facts(&[("project_type", "residential"), ("region", "north")]);

        let forward = score_business_units(&facts, &[lifts.clone(), hvac.clone()]);
        let reversed = score_business_units(&facts, &[hvac.clone(), lifts.clone()]);
        let again = score_business_units(&facts, &[lifts, hvac]);

        assert_eq!(forward, again, "same inputs must produce identical scores");
        assert_eq!(forward[0].bu_code, "LIFTS");
        assert_eq!(reversed[0].bu_code, "HVAC");
        assert_eq!(forward[0], reversed[1]);
        assert_eq!(forward[1], reversed[0]);
    }

    #[test]
    fn scores_round_half_up_to_four_decimals() {
        assert_eq!(round4(0.123_45), 0.1235);
        assert_eq!(round4(0.123_44), 0.1234);
        assert_eq!(round4(1.0 / 3.0), 0.3333);
    }

    #[test]
    fn serialized_score_exposes_engine_fields() {
        let rule_sets = vec![rule_set(
            "LIFTS",
            vec![condition("project_stage", RuleOperator::Eq, Some("tender"), &[], 1.0, true)],
        )];
        let score: BuScore =
            score_business_units(&facts(&[("project_stage", "tender")]), &rule_sets)
                .into_iter()
                .next()
                .expect("one score");

        let json = serde_json::to_value(&score).expect("serialize");
        assert_eq!(json["bu_code"], "LIFTS");
        assert_eq!(json["qualified"], true);
    }
}
