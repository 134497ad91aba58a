use sqlx::{sqlite::SqliteRow, Row};

use leadroute_core::domain::fact::{Fact, LeadId};

use super::{parse_timestamp, FactRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFactRepository {
    pool: DbPool,
}

impl SqlFactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FactRepository for SqlFactRepository {
    async fn facts_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Fact>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT lead_id, fact_key, fact_value, confidence, created_at
             FROM lead_facts
             WHERE lead_id = ?
             ORDER BY fact_key ASC, created_at ASC, id ASC",
        )
        .bind(&lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(fact_from_row).collect()
    }

    async fn replace_lead_facts(
        &self,
        lead_id: &LeadId,
        facts: Vec<Fact>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM lead_facts WHERE lead_id = ?")
            .bind(&lead_id.0)
            .execute(&mut *tx)
            .await?;

        for fact in facts {
            sqlx::query(
                "INSERT INTO lead_facts (id, lead_id, fact_key, fact_value, confidence, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&lead_id.0)
            .bind(&fact.fact_key)
            .bind(&fact.fact_value)
            .bind(fact.confidence)
            .bind(fact.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn fact_from_row(row: SqliteRow) -> Result<Fact, RepositoryError> {
    Ok(Fact {
        lead_id: LeadId(row.try_get("lead_id")?),
        fact_key: row.try_get("fact_key")?,
        fact_value: row.try_get("fact_value")?,
        confidence: row.try_get("confidence")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
