use sqlx::{sqlite::SqliteRow, Row};

use leadroute_core::domain::assignment::{Assignment, AssignmentId, AssignmentStatus};
use leadroute_core::domain::business_unit::BusinessUnitId;
use leadroute_core::domain::fact::LeadId;
use leadroute_core::domain::routing::{RecommendationId, RoutingRole};

use super::{parse_optional_timestamp, parse_timestamp, AssignmentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAssignmentRepository {
    pool: DbPool,
}

impl SqlAssignmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const ASSIGNMENT_COLUMNS: &str = "id, lead_id, business_unit_id, routing_recommendation_id,
    assigned_role, status, approved_by, approved_at, dispatched_at, decision_reason,
    created_at, updated_at";

#[async_trait::async_trait]
impl AssignmentRepository for SqlAssignmentRepository {
    async fn find_by_id(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(assignment_from_row).transpose()
    }

    async fn find_active(
        &self,
        lead_id: &LeadId,
        business_unit_id: &BusinessUnitId,
    ) -> Result<Option<Assignment>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS}
             FROM assignments
             WHERE lead_id = ? AND business_unit_id = ?
               AND status IN ('pending_synergy', 'approved', 'dispatched')"
        ))
        .bind(&lead_id.0)
        .bind(&business_unit_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(assignment_from_row).transpose()
    }

    async fn list_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ASSIGNMENT_COLUMNS}
             FROM assignments
             WHERE lead_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&lead_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(assignment_from_row).collect()
    }

    async fn save(&self, assignment: Assignment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO assignments (
                id, lead_id, business_unit_id, routing_recommendation_id,
                assigned_role, status, approved_by, approved_at, dispatched_at,
                decision_reason, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                approved_by = excluded.approved_by,
                approved_at = excluded.approved_at,
                dispatched_at = excluded.dispatched_at,
                decision_reason = excluded.decision_reason,
                updated_at = excluded.updated_at",
        )
        .bind(&assignment.id.0)
        .bind(&assignment.lead_id.0)
        .bind(&assignment.business_unit_id.0)
        .bind(&assignment.routing_recommendation_id.0)
        .bind(assignment.assigned_role.as_str())
        .bind(assignment.status.as_str())
        .bind(assignment.approved_by.as_deref())
        .bind(assignment.approved_at.map(|value| value.to_rfc3339()))
        .bind(assignment.dispatched_at.map(|value| value.to_rfc3339()))
        .bind(assignment.decision_reason.as_deref())
        .bind(assignment.created_at.to_rfc3339())
        .bind(assignment.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) fn assignment_from_row(row: SqliteRow) -> Result<Assignment, RepositoryError> {
    Ok(Assignment {
        id: AssignmentId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        business_unit_id: BusinessUnitId(row.try_get("business_unit_id")?),
        routing_recommendation_id: RecommendationId(row.try_get("routing_recommendation_id")?),
        assigned_role: RoutingRole::parse(&row.try_get::<String, _>("assigned_role")?),
        status: AssignmentStatus::parse(&row.try_get::<String, _>("status")?),
        approved_by: row.try_get("approved_by")?,
        approved_at: parse_optional_timestamp("approved_at", row.try_get("approved_at")?)?,
        dispatched_at: parse_optional_timestamp("dispatched_at", row.try_get("dispatched_at")?)?,
        decision_reason: row.try_get("decision_reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use leadroute_core::domain::assignment::{Assignment, AssignmentStatus};
    use leadroute_core::domain::business_unit::{BusinessUnit, BusinessUnitId};
    use leadroute_core::domain::fact::{Lead, LeadId};
    use leadroute_core::domain::routing::{RecommendationId, RoutingRole};

    use super::SqlAssignmentRepository;
    use crate::repositories::{
        AssignmentRepository, BusinessUnitRepository, LeadRepository, SqlBusinessUnitRepository,
        SqlLeadRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    // Each test gets its own named in-memory database; the plain
    // `:memory:` shared-cache name is global to the process.
    async fn setup_pool(db_name: &str) -> DbPool {
        let url = format!("sqlite:{db_name}?mode=memory&cache=shared");
        let pool =
            connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    async fn seed_refs(pool: &DbPool, lead_id: &LeadId, bu_id: &BusinessUnitId) {
        SqlLeadRepository::new(pool.clone())
            .save(Lead::new(lead_id.clone(), "test"))
            .await
            .expect("insert lead");
        SqlBusinessUnitRepository::new(pool.clone())
            .save(BusinessUnit {
                id: bu_id.clone(),
                code: "LIFTS".to_string(),
                name: "Lifts".to_string(),
            })
            .await
            .expect("insert unit");

        let timestamp = "2026-03-01T12:00:00Z";
        let run_id = format!("run-{}", lead_id.0);
        let rec_id = format!("rec-{}", lead_id.0);
        sqlx::query(
            "INSERT INTO routing_runs (id, lead_id, status, engine_version, started_at)
             VALUES (?, ?, 'completed', 'deterministic-v1', ?)",
        )
        .bind(&run_id)
        .bind(&lead_id.0)
        .bind(timestamp)
        .execute(pool)
        .await
        .expect("insert run");
        sqlx::query(
            "INSERT INTO routing_recommendations (
                id, routing_run_id, business_unit_id, bu_code, role, rank,
                rule_score, final_score, confidence, reason_summary
             ) VALUES (?, ?, ?, 'LIFTS', 'primary', 1, 0.9, 0.9, 0.9, 'matched')",
        )
        .bind(&rec_id)
        .bind(&run_id)
        .bind(&bu_id.0)
        .execute(pool)
        .await
        .expect("insert recommendation");
    }

    fn assignment(lead_id: &LeadId, bu_id: &BusinessUnitId) -> Assignment {
        Assignment::pending(
            lead_id.clone(),
            bu_id.clone(),
            RecommendationId(format!("rec-{}", lead_id.0)),
            RoutingRole::Primary,
        )
    }

    #[tokio::test]
    async fn active_lookup_ignores_settled_assignments() {
        let pool = setup_pool("assignment-active").await;
        let lead_id = LeadId("lead-1".to_string());
        let bu_id = BusinessUnitId("bu-lifts".to_string());
        seed_refs(&pool, &lead_id, &bu_id).await;

        let repo = SqlAssignmentRepository::new(pool.clone());
        let mut first = assignment(&lead_id, &bu_id);
        repo.save(first.clone()).await.expect("save pending assignment");

        let active = repo.find_active(&lead_id, &bu_id).await.expect("find active");
        assert_eq!(active.as_ref().map(|a| a.id.clone()), Some(first.id.clone()));

        first.cancel(Some("routed in error")).expect("cancel");
        repo.save(first.clone()).await.expect("save canceled assignment");

        let after_cancel = repo.find_active(&lead_id, &bu_id).await.expect("find active");
        assert!(after_cancel.is_none(), "canceled assignments are not active");

        let second = assignment(&lead_id, &bu_id);
        repo.save(second.clone()).await.expect("a new pending assignment is allowed");

        let listed = repo.list_for_lead(&lead_id).await.expect("list assignments");
        assert_eq!(listed.len(), 2);

        pool.close().await;
    }

    #[tokio::test]
    async fn duplicate_active_assignment_is_rejected_by_the_schema() {
        let pool = setup_pool("assignment-unique").await;
        let lead_id = LeadId("lead-2".to_string());
        let bu_id = BusinessUnitId("bu-lifts".to_string());
        seed_refs(&pool, &lead_id, &bu_id).await;

        let repo = SqlAssignmentRepository::new(pool.clone());
        repo.save(assignment(&lead_id, &bu_id)).await.expect("first active assignment");

        let duplicate = repo.save(assignment(&lead_id, &bu_id)).await;
        assert!(duplicate.is_err(), "second live assignment for the same pair must fail");

        let listed = repo.list_for_lead(&lead_id).await.expect("list assignments");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, AssignmentStatus::PendingSynergy);

        pool.close().await;
    }
}
