use sqlx::{sqlite::SqliteRow, Row};

use leadroute_core::domain::delegation::{
    DelegationSession, DelegationSessionId, DelegationStep, DelegationStepId, SessionStatus,
    StepStatus,
};
use leadroute_core::domain::fact::LeadId;
use leadroute_core::domain::routing::RoutingRunId;

use super::{parse_optional_timestamp, parse_timestamp, DelegationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDelegationRepository {
    pool: DbPool,
}

impl SqlDelegationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, routing_run_id, lead_id, thread_id, status, pending_step_id,
    last_error, created_at, updated_at";

const STEP_COLUMNS: &str = "id, session_id, step_index, subagent_name, status,
    request_payload_json, decision_by, decision_reason, decided_at, executed_at, error";

#[async_trait::async_trait]
impl DelegationRepository for SqlDelegationRepository {
    async fn find_session(
        &self,
        id: &DelegationSessionId,
    ) -> Result<Option<DelegationSession>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM delegation_sessions WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn find_session_by_run(
        &self,
        routing_run_id: &RoutingRunId,
    ) -> Result<Option<DelegationSession>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM delegation_sessions WHERE routing_run_id = ?"
        ))
        .bind(&routing_run_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn upsert_session(&self, session: DelegationSession) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO delegation_sessions (
                id, routing_run_id, lead_id, thread_id, status, pending_step_id,
                last_error, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(routing_run_id) DO UPDATE SET
                status = excluded.status,
                pending_step_id = excluded.pending_step_id,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(&session.id.0)
        .bind(&session.routing_run_id.0)
        .bind(&session.lead_id.0)
        .bind(&session.thread_id)
        .bind(session.status.as_str())
        .bind(session.pending_step_id.as_ref().map(|id| id.0.as_str()))
        .bind(session.last_error.as_deref())
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_step(
        &self,
        id: &DelegationStepId,
    ) -> Result<Option<DelegationStep>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {STEP_COLUMNS} FROM delegation_steps WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(step_from_row).transpose()
    }

    async fn list_steps(
        &self,
        session_id: &DelegationSessionId,
    ) -> Result<Vec<DelegationStep>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS}
             FROM delegation_steps
             WHERE session_id = ?
             ORDER BY step_index ASC"
        ))
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(step_from_row).collect()
    }

    async fn upsert_step(&self, step: DelegationStep) -> Result<(), RepositoryError> {
        let request_payload_json = serde_json::to_string(&step.request_payload).map_err(|error| {
            RepositoryError::Decode(format!("could not encode step payload: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO delegation_steps (
                id, session_id, step_index, subagent_name, status, request_payload_json,
                decision_by, decision_reason, decided_at, executed_at, error
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, step_index) DO UPDATE SET
                subagent_name = excluded.subagent_name,
                status = excluded.status,
                request_payload_json = excluded.request_payload_json,
                decision_by = excluded.decision_by,
                decision_reason = excluded.decision_reason,
                decided_at = excluded.decided_at,
                executed_at = excluded.executed_at,
                error = excluded.error",
        )
        .bind(&step.id.0)
        .bind(&step.session_id.0)
        .bind(step.step_index)
        .bind(&step.subagent_name)
        .bind(step.status.as_str())
        .bind(request_payload_json)
        .bind(step.decision_by.as_deref())
        .bind(step.decision_reason.as_deref())
        .bind(step.decided_at.map(|value| value.to_rfc3339()))
        .bind(step.executed_at.map(|value| value.to_rfc3339()))
        .bind(step.error.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn session_from_row(row: SqliteRow) -> Result<DelegationSession, RepositoryError> {
    Ok(DelegationSession {
        id: DelegationSessionId(row.try_get("id")?),
        routing_run_id: RoutingRunId(row.try_get("routing_run_id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        thread_id: row.try_get("thread_id")?,
        status: SessionStatus::parse(&row.try_get::<String, _>("status")?),
        pending_step_id: row.try_get::<Option<String>, _>("pending_step_id")?.map(DelegationStepId),
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn step_from_row(row: SqliteRow) -> Result<DelegationStep, RepositoryError> {
    let request_payload_json = row.try_get::<String, _>("request_payload_json")?;
    let request_payload: serde_json::Value =
        serde_json::from_str(&request_payload_json).map_err(|error| {
            RepositoryError::Decode(format!("invalid step payload JSON: {error}"))
        })?;

    Ok(DelegationStep {
        id: DelegationStepId(row.try_get("id")?),
        session_id: DelegationSessionId(row.try_get("session_id")?),
        step_index: row.try_get("step_index")?,
        subagent_name: row.try_get("subagent_name")?,
        status: StepStatus::parse(&row.try_get::<String, _>("status")?),
        request_payload,
        decision_by: row.try_get("decision_by")?,
        decision_reason: row.try_get("decision_reason")?,
        decided_at: parse_optional_timestamp("decided_at", row.try_get("decided_at")?)?,
        executed_at: parse_optional_timestamp("executed_at", row.try_get("executed_at")?)?,
        error: row.try_get("error")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use leadroute_core::domain::delegation::{
        DelegationSession, DelegationSessionId, DelegationStep, DelegationStepId, SessionStatus,
        StepStatus,
    };
    use leadroute_core::domain::fact::{Lead, LeadId};
    use leadroute_core::domain::routing::{RoutingRun, RoutingRunId};

    use super::SqlDelegationRepository;
    use crate::repositories::{DelegationRepository, LeadRepository, SqlLeadRepository, SqlRoutingStore};
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

    async fn seed_run(pool: &DbPool, lead_id: &LeadId) -> RoutingRunId {
        SqlLeadRepository::new(pool.clone())
            .save(Lead::new(lead_id.clone(), "test"))
            .await
            .expect("insert lead");
        let run = RoutingRun::new(lead_id.clone(), "delegation-v1");
        SqlRoutingStore::new(pool.clone()).create_run(&run).await.expect("create run");
        run.id
    }

    fn session(run_id: &RoutingRunId, lead_id: &LeadId) -> DelegationSession {
        let now = Utc::now();
        DelegationSession {
            id: DelegationSessionId("sess-1".to_string()),
            routing_run_id: run_id.clone(),
            lead_id: lead_id.clone(),
            thread_id: "thread-1".to_string(),
            status: SessionStatus::InProgress,
            pending_step_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn step(session_id: &DelegationSessionId, index: i64) -> DelegationStep {
        DelegationStep {
            id: DelegationStepId(format!("step-{index}")),
            session_id: session_id.clone(),
            step_index: index,
            subagent_name: "bu-analyst".to_string(),
            status: StepStatus::Pending,
            request_payload: serde_json::json!({ "question": "confirm region" }),
            decision_by: None,
            decision_reason: None,
            decided_at: None,
            executed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn sessions_upsert_by_routing_run() {
        let pool = setup_pool("delegation-sessions").await;
        let lead_id = LeadId("lead-1".to_string());
        let run_id = seed_run(&pool, &lead_id).await;

        let repo = SqlDelegationRepository::new(pool.clone());
        let mut session = session(&run_id, &lead_id);
        repo.upsert_session(session.clone()).await.expect("insert session");

        session.status = SessionStatus::PendingApproval;
        session.pending_step_id = Some(DelegationStepId("step-0".to_string()));
        repo.upsert_session(session.clone()).await.expect("update session");

        let found = repo
            .find_session_by_run(&run_id)
            .await
            .expect("find session")
            .expect("session exists");
        assert_eq!(found.status, SessionStatus::PendingApproval);
        assert_eq!(found.pending_step_id, Some(DelegationStepId("step-0".to_string())));

        pool.close().await;
    }

    #[tokio::test]
    async fn steps_upsert_by_session_and_index() {
        let pool = setup_pool("delegation-steps").await;
        let lead_id = LeadId("lead-2".to_string());
        let run_id = seed_run(&pool, &lead_id).await;

        let repo = SqlDelegationRepository::new(pool.clone());
        let session = session(&run_id, &lead_id);
        repo.upsert_session(session.clone()).await.expect("insert session");

        repo.upsert_step(step(&session.id, 0)).await.expect("insert step 0");
        repo.upsert_step(step(&session.id, 1)).await.expect("insert step 1");

        let mut decided = step(&session.id, 0);
        decided.status = StepStatus::Approved;
        decided.decision_by = Some("reviewer-1".to_string());
        decided.decided_at = Some(Utc::now());
        repo.upsert_step(decided).await.expect("decide step 0");

        let steps = repo.list_steps(&session.id).await.expect("list steps");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].status, StepStatus::Approved);
        assert_eq!(steps[0].decision_by.as_deref(), Some("reviewer-1"));
        assert_eq!(steps[1].status, StepStatus::Pending);
        assert_eq!(steps[0].request_payload["question"], "confirm region");

        pool.close().await;
    }
}
