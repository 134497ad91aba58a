//! Ranking selector: orders qualified scores into a primary recommendation
//! plus a bounded cross-sell set.

use serde::Serialize;

use crate::domain::routing::RoutingRole;
use crate::scoring::BuScore;

#[derive(Clone, Copy, Debug)]
pub struct RankingOptions {
    pub max_cross_sell: usize,
    pub min_cross_sell_score: f64,
}

impl Default for RankingOptions {
    fn default() -> Self {
        Self { max_cross_sell: 2, min_cross_sell_score: 0.35 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedBu {
    pub score: BuScore,
    pub role: RoutingRole,
    pub rank: u32,
}

/// Selects and orders recommendations from raw scores.
///
/// Only qualified scores with a positive final score participate. The
/// order is total: final score
/// descending, then matched required descending, then matched conditions
/// descending, then BU code ascending. The first entry is PRIMARY; up to
/// `max_cross_sell` further entries at or above `min_cross_sell_score`
/// become CROSS_SELL. Ranks are contiguous starting at 1.
pub fn rank_recommendations(scores: &[BuScore], options: RankingOptions) -> Vec<RankedBu> {
    let mut qualified: Vec<&BuScore> = scores
        .iter()
        .filter(|score| score.qualified && score.final_score > 0.0)
        .collect();
    qualified.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| b.matched_required.cmp(&a.matched_required))
            .then_with(|| b.matched_conditions.cmp(&a.matched_conditions))
            .then_with(|| a.bu_code.cmp(&b.bu_code))
    });

    let mut ranked = Vec::new();
    for score in qualified {
        let role = if ranked.is_empty() {
            RoutingRole::Primary
        } else {
            if ranked.len() > options.max_cross_sell {
                break;
            }
            if score.final_score < options.min_cross_sell_score {
                break;
            }
            RoutingRole::CrossSell
        };
        let rank = ranked.len() as u32 + 1;
        ranked.push(RankedBu { score: score.clone(), role, rank });
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::{rank_recommendations, RankingOptions};
    use crate::domain::business_unit::BusinessUnitId;
    use crate::domain::routing::RoutingRole;
    use crate::scoring::BuScore;

    fn score(bu_code: &str, final_score: f64, matched_required: u32, matched: u32) -> BuScore {
        BuScore {
            business_unit_id: BusinessUnitId(format!("bu-{bu_code}")),
            bu_code: bu_code.to_string(),
            bu_name: format!("{bu_code} unit"),
            matched_conditions: matched,
            total_conditions: matched.max(1),
            matched_required,
            total_required: matched_required,
            missing_required_keys: Vec::new(),
            qualified: true,
            rule_score: final_score,
            final_score,
            confidence: final_score,
            reason_summary: String::new(),
        }
    }

    fn unqualified(bu_code: &str) -> BuScore {
        BuScore {
            qualified: false,
            final_score: 0.0,
            missing_required_keys: vec!["region".to_string()],
            ..score(bu_code, 0.9, 0, 3)
        }
    }

    #[test]
    fn primary_is_the_best_qualified_score() {
        let ranked = rank_recommendations(
            &[score("HVAC", 0.6, 1, 2), score("LIFTS", 0.9, 2, 3)],
            RankingOptions::default(),
        );

        assert_eq!(ranked[0].score.bu_code, "LIFTS");
        assert_eq!(ranked[0].role, RoutingRole::Primary);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].score.bu_code, "HVAC");
        assert_eq!(ranked[1].role, RoutingRole::CrossSell);
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn unqualified_scores_never_rank() {
        let ranked = rank_recommendations(
            &[unqualified("HVAC"), score("LIFTS", 0.4, 1, 1)],
            RankingOptions::default(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score.bu_code, "LIFTS");
    }

    #[test]
    fn cross_sell_is_bounded_and_thresholded() {
        let ranked = rank_recommendations(
            &[
                score("A", 0.9, 2, 3),
                score("B", 0.8, 2, 3),
                score("C", 0.7, 2, 3),
                score("D", 0.6, 2, 3),
            ],
            RankingOptions::default(),
        );
        assert_eq!(ranked.len(), 3, "primary plus at most two cross-sells");
        assert_eq!(ranked[2].score.bu_code, "C");

        let thresholded = rank_recommendations(
            &[score("A", 0.9, 2, 3), score("B", 0.2, 2, 3)],
            RankingOptions::default(),
        );
        assert_eq!(thresholded.len(), 1, "below-threshold scores never cross-sell");
    }

    #[test]
    fn primary_ignores_the_cross_sell_threshold() {
        let ranked = rank_recommendations(&[score("A", 0.1, 1, 1)], RankingOptions::default());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].role, RoutingRole::Primary);
    }

    #[test]
    fn ties_break_on_required_then_matched_then_code() {
        let ranked = rank_recommendations(
            &[
                score("ZETA", 0.8, 1, 2),
                score("ALFA", 0.8, 1, 2),
                score("MIDD", 0.8, 2, 2),
            ],
            RankingOptions::default(),
        );

        assert_eq!(ranked[0].score.bu_code, "MIDD", "more required matches wins the tie");
        assert_eq!(ranked[1].score.bu_code, "ALFA", "bu_code ascending breaks the final tie");
        assert_eq!(ranked[2].score.bu_code, "ZETA");
    }

    #[test]
    fn qualified_zero_scores_never_rank() {
        // A rule set with no required conditions qualifies even when nothing
        // matched, leaving final_score at zero.
        let ranked = rank_recommendations(
            &[score("SAFE", 0.0, 0, 0), score("LIFTS", 0.4, 1, 1)],
            RankingOptions::default(),
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score.bu_code, "LIFTS");

        let alone = rank_recommendations(&[score("SAFE", 0.0, 0, 0)], RankingOptions::default());
        assert!(alone.is_empty(), "a zero score must not become the primary recommendation");
    }

    #[test]
    fn empty_and_all_unqualified_inputs_yield_no_recommendations() {
        assert!(rank_recommendations(&[], RankingOptions::default()).is_empty());
        assert!(rank_recommendations(&[unqualified("A")], RankingOptions::default()).is_empty());
    }
}
