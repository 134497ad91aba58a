use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Canonical demo seeds and verification contract for the routing pipeline.
const SEED_UNITS: &[SeedUnitContract] = &[
    SeedUnitContract {
        bu_id: "bu-lifts-001",
        bu_code: "LIFTS",
        rule_set_id: "rs-lifts-v1",
        condition_count: 3,
        required_count: 2,
        sku_count: 3,
    },
    SeedUnitContract {
        bu_id: "bu-hvac-001",
        bu_code: "HVAC",
        rule_set_id: "rs-hvac-v1",
        condition_count: 3,
        required_count: 1,
        sku_count: 2,
    },
    SeedUnitContract {
        bu_id: "bu-safety-001",
        bu_code: "SAFETY",
        rule_set_id: "rs-safety-v1",
        condition_count: 3,
        required_count: 1,
        sku_count: 2,
    },
];

const SEED_LEAD_ID: &str = "lead-demo-001";
const SEED_LEAD_FACT_COUNT: i64 = 6;

/// Demo seed dataset: three BUs with active rule sets and SKU catalogs plus
/// one extracted lead, so a fresh checkout can route end to end.
pub struct RoutingSeedDataset;

impl RoutingSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_routing_demo.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            units_seeded: SEED_UNITS.iter().map(|unit| unit.bu_code).collect(),
            lead_id: SEED_LEAD_ID,
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for unit in SEED_UNITS {
            let unit_exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM business_units WHERE id = ?1 AND code = ?2)",
            )
            .bind(unit.bu_id)
            .bind(unit.bu_code)
            .fetch_one(pool)
            .await?;
            checks.push((unit.bu_code, unit_exists == 1));

            let rule_set_active: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM rule_sets WHERE id = ?1 AND business_unit_id = ?2 AND status = 'active')",
            )
            .bind(unit.rule_set_id)
            .bind(unit.bu_id)
            .fetch_one(pool)
            .await?;
            checks.push((unit.rule_set_id, rule_set_active == 1));

            let condition_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM rule_conditions WHERE rule_set_id = ?1")
                    .bind(unit.rule_set_id)
                    .fetch_one(pool)
                    .await?;
            checks.push(("rule-conditions", condition_count == unit.condition_count));

            let required_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM rule_conditions WHERE rule_set_id = ?1 AND is_required = 1",
            )
            .bind(unit.rule_set_id)
            .fetch_one(pool)
            .await?;
            checks.push(("required-conditions", required_count == unit.required_count));

            let sku_count: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM bu_skus WHERE business_unit_id = ?1")
                    .bind(unit.bu_id)
                    .fetch_one(pool)
                    .await?;
            checks.push(("bu-skus", sku_count == unit.sku_count));
        }

        let lead_new: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM leads WHERE id = ?1 AND routing_state = 'new')",
        )
        .bind(SEED_LEAD_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("demo-lead", lead_new == 1));

        let fact_count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM lead_facts WHERE lead_id = ?1")
                .bind(SEED_LEAD_ID)
                .fetch_one(pool)
                .await?;
        checks.push(("demo-lead-facts", fact_count == SEED_LEAD_FACT_COUNT));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Remove the seeded fixtures from a test database.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM lead_facts WHERE lead_id = ?")
            .bind(SEED_LEAD_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM leads WHERE id = ?")
            .bind(SEED_LEAD_ID)
            .execute(&mut *tx)
            .await?;

        for unit in SEED_UNITS {
            sqlx::query("DELETE FROM rule_conditions WHERE rule_set_id = ?")
                .bind(unit.rule_set_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM rule_sets WHERE id = ?")
                .bind(unit.rule_set_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM bu_skus WHERE business_unit_id = ?")
                .bind(unit.bu_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM business_units WHERE id = ?")
                .bind(unit.bu_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedUnitContract {
    bu_id: &'static str,
    bu_code: &'static str,
    rule_set_id: &'static str,
    condition_count: i64,
    required_count: i64,
    sku_count: i64,
}

#[derive(Debug)]
pub struct SeedResult {
    pub units_seeded: Vec<&'static str>,
    pub lead_id: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
