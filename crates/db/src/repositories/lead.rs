use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use leadroute_core::domain::fact::{Lead, LeadId, LeadRoutingState};

use super::{parse_timestamp, LeadRepository, RepositoryError};
use crate::DbPool;

pub struct SqlLeadRepository {
    pool: DbPool,
}

impl SqlLeadRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeadRepository for SqlLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, source, routing_state, created_at, updated_at
             FROM leads
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(lead_from_row).transpose()
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO leads (id, source, routing_state, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                routing_state = excluded.routing_state,
                updated_at = excluded.updated_at",
        )
        .bind(&lead.id.0)
        .bind(&lead.source)
        .bind(lead.routing_state.as_str())
        .bind(lead.created_at.to_rfc3339())
        .bind(lead.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_routing_state(
        &self,
        id: &LeadId,
        state: LeadRoutingState,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE leads SET routing_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn lead_from_row(row: SqliteRow) -> Result<Lead, RepositoryError> {
    Ok(Lead {
        id: LeadId(row.try_get("id")?),
        source: row.try_get("source")?,
        routing_state: LeadRoutingState::parse(&row.try_get::<String, _>("routing_state")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
