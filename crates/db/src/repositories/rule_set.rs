use sqlx::{sqlite::SqliteRow, Row};

use leadroute_core::domain::business_unit::BusinessUnitId;
use leadroute_core::domain::rules::{RuleCondition, RuleOperator, RuleSet, RuleSetId, RuleSetStatus};

use super::{RepositoryError, RuleSetRepository};
use crate::DbPool;

pub struct SqlRuleSetRepository {
    pool: DbPool,
}

impl SqlRuleSetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conditions_for(&self, rule_set_id: &RuleSetId) -> Result<Vec<RuleCondition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT fact_key, operator, comparison_value, comparison_values_json, weight, is_required
             FROM rule_conditions
             WHERE rule_set_id = ?
             ORDER BY position ASC, id ASC",
        )
        .bind(&rule_set_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(condition_from_row).collect()
    }
}

#[async_trait::async_trait]
impl RuleSetRepository for SqlRuleSetRepository {
    async fn latest_active_rule_sets(&self) -> Result<Vec<RuleSet>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT rs.id, rs.business_unit_id, bu.code AS bu_code, bu.name AS bu_name,
                    rs.version, rs.status
             FROM rule_sets rs
             JOIN business_units bu ON bu.id = rs.business_unit_id
             WHERE rs.status = 'active'
               AND rs.version = (
                   SELECT MAX(inner_rs.version)
                   FROM rule_sets inner_rs
                   WHERE inner_rs.business_unit_id = rs.business_unit_id
                     AND inner_rs.status = 'active'
               )
             ORDER BY bu.code ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rule_sets = Vec::with_capacity(rows.len());
        for row in rows {
            let mut rule_set = rule_set_from_row(row)?;
            rule_set.conditions = self.conditions_for(&rule_set.id).await?;
            rule_sets.push(rule_set);
        }
        Ok(rule_sets)
    }

    async fn save(&self, rule_set: RuleSet) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO rule_sets (id, business_unit_id, version, status, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status",
        )
        .bind(&rule_set.id.0)
        .bind(&rule_set.business_unit_id.0)
        .bind(rule_set.version)
        .bind(rule_set.status.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM rule_conditions WHERE rule_set_id = ?")
            .bind(&rule_set.id.0)
            .execute(&mut *tx)
            .await?;

        for (position, condition) in rule_set.conditions.iter().enumerate() {
            let comparison_values_json =
                serde_json::to_string(&condition.comparison_values).map_err(|error| {
                    RepositoryError::Decode(format!("could not encode comparison values: {error}"))
                })?;

            sqlx::query(
                "INSERT INTO rule_conditions (
                    id, rule_set_id, fact_key, operator, comparison_value,
                    comparison_values_json, weight, is_required, position
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&rule_set.id.0)
            .bind(&condition.fact_key)
            .bind(condition.operator.as_str())
            .bind(condition.comparison_value.as_deref())
            .bind(comparison_values_json)
            .bind(condition.weight)
            .bind(condition.is_required)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn rule_set_from_row(row: SqliteRow) -> Result<RuleSet, RepositoryError> {
    Ok(RuleSet {
        id: RuleSetId(row.try_get("id")?),
        business_unit_id: BusinessUnitId(row.try_get("business_unit_id")?),
        bu_code: row.try_get("bu_code")?,
        bu_name: row.try_get("bu_name")?,
        version: row.try_get("version")?,
        status: RuleSetStatus::parse(&row.try_get::<String, _>("status")?),
        conditions: Vec::new(),
    })
}

fn condition_from_row(row: SqliteRow) -> Result<RuleCondition, RepositoryError> {
    let operator_raw = row.try_get::<String, _>("operator")?;
    let operator = RuleOperator::parse(&operator_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown rule operator `{operator_raw}`")))?;

    let comparison_values_json = row.try_get::<String, _>("comparison_values_json")?;
    let comparison_values: Vec<String> =
        serde_json::from_str(&comparison_values_json).map_err(|error| {
            RepositoryError::Decode(format!("invalid comparison values JSON: {error}"))
        })?;

    Ok(RuleCondition {
        fact_key: row.try_get("fact_key")?,
        operator,
        comparison_value: row.try_get("comparison_value")?,
        comparison_values,
        weight: row.try_get("weight")?,
        is_required: row.try_get("is_required")?,
    })
}
