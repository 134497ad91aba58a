use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use leadroute_core::domain::agent_log::{AgentLogEntry, AgentMessageType, EvidenceRef};
use leadroute_core::domain::assignment::Assignment;
use leadroute_core::domain::business_unit::{BuSkuId, BusinessUnitId};
use leadroute_core::domain::fact::{LeadId, LeadRoutingState};
use leadroute_core::domain::routing::{
    RecommendationId, RecommendationSku, RoutingRecommendation, RoutingRole, RoutingRun,
    RoutingRunId, RunStatus,
};

use super::{parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError};
use crate::DbPool;

/// Everything one business unit contributes to a completed run.
#[derive(Clone, Debug)]
pub struct BuOutcome {
    pub recommendation: RoutingRecommendation,
    pub skus: Vec<RecommendationSku>,
    pub logs: Vec<AgentLogEntry>,
}

/// The full output of a routing run, persisted in one transaction.
#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub run_id: RoutingRunId,
    pub lead_id: LeadId,
    pub bu_outcomes: Vec<BuOutcome>,
    pub summary_log: Option<AgentLogEntry>,
}

/// A persisted run loaded back for replay or inspection.
#[derive(Clone, Debug)]
pub struct RunBundle {
    pub run: RoutingRun,
    pub recommendations: Vec<RoutingRecommendation>,
    pub skus: Vec<RecommendationSku>,
    pub logs: Vec<AgentLogEntry>,
}

pub struct SqlRoutingStore {
    pool: DbPool,
}

impl SqlRoutingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create_run(&self, run: &RoutingRun) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO routing_runs (id, lead_id, status, engine_version, last_error, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id.0)
        .bind(&run.lead_id.0)
        .bind(run.status.as_str())
        .bind(&run.engine_version)
        .bind(run.last_error.as_deref())
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|value| value.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn find_run(&self, id: &RoutingRunId) -> Result<Option<RoutingRun>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, lead_id, status, engine_version, last_error, started_at, finished_at
             FROM routing_runs
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(run_from_row).transpose()
    }

    pub async fn latest_run_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<RoutingRun>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, lead_id, status, engine_version, last_error, started_at, finished_at
             FROM routing_runs
             WHERE lead_id = ?
             ORDER BY started_at DESC, id DESC
             LIMIT 1",
        )
        .bind(&lead_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(run_from_row).transpose()
    }

    pub async fn update_run(&self, run: &RoutingRun) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE routing_runs
             SET status = ?, last_error = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(run.status.as_str())
        .bind(run.last_error.as_deref())
        .bind(run.finished_at.map(|value| value.to_rfc3339()))
        .bind(&run.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks the run FAILED and flags the lead, in one transaction. Safe to
    /// call from error paths after a rolled-back outcome write.
    pub async fn mark_run_failed(
        &self,
        run_id: &RoutingRunId,
        lead_id: &LeadId,
        reason: &str,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // Terminal runs are immutable; a late failure signal is a no-op.
        let updated = sqlx::query(
            "UPDATE routing_runs
             SET status = 'failed', last_error = ?, finished_at = ?
             WHERE id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(reason)
        .bind(&now)
        .bind(&run_id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(());
        }

        sqlx::query("UPDATE leads SET routing_state = 'routing_failed', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&lead_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Writes the whole run outcome atomically: recommendations, SKU
    /// proposals, agent logs, idempotent assignment creation, the COMPLETED
    /// run transition, and the lead's routed marker. Either all of it lands
    /// or none of it does.
    pub async fn persist_run_outcome(&self, outcome: &RunOutcome) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for bu_outcome in &outcome.bu_outcomes {
            insert_recommendation(&mut tx, &bu_outcome.recommendation).await?;
            for sku in &bu_outcome.skus {
                insert_recommendation_sku(&mut tx, sku).await?;
            }
            for log in &bu_outcome.logs {
                insert_agent_log(&mut tx, log).await?;
            }
            ensure_assignment(&mut tx, &outcome.lead_id, &bu_outcome.recommendation).await?;
        }

        if let Some(summary) = &outcome.summary_log {
            insert_agent_log(&mut tx, summary).await?;
        }

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE routing_runs
             SET status = 'completed', finished_at = ?
             WHERE id = ?",
        )
        .bind(&now)
        .bind(&outcome.run_id.0)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE leads SET routing_state = 'routed', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&outcome.lead_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn load_run_bundle(
        &self,
        run_id: &RoutingRunId,
    ) -> Result<Option<RunBundle>, RepositoryError> {
        let Some(run) = self.find_run(run_id).await? else {
            return Ok(None);
        };

        let recommendation_rows = sqlx::query(
            "SELECT id, routing_run_id, business_unit_id, bu_code, role, rank,
                    rule_score, final_score, confidence, reason_summary
             FROM routing_recommendations
             WHERE routing_run_id = ?
             ORDER BY rank ASC",
        )
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;
        let recommendations = recommendation_rows
            .into_iter()
            .map(recommendation_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let sku_rows = sqlx::query(
            "SELECT rs.recommendation_id, rs.bu_sku_id, rs.rank, rs.confidence, rs.rationale
             FROM recommendation_skus rs
             JOIN routing_recommendations rr ON rr.id = rs.recommendation_id
             WHERE rr.routing_run_id = ?
             ORDER BY rr.rank ASC, rs.rank ASC",
        )
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;
        let skus =
            sku_rows.into_iter().map(recommendation_sku_from_row).collect::<Result<Vec<_>, _>>()?;

        let log_rows = sqlx::query(
            "SELECT id, routing_run_id, agent_id, recipient_id, message_type, content,
                    evidence_refs_json, created_at
             FROM agent_logs
             WHERE routing_run_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(&run_id.0)
        .fetch_all(&self.pool)
        .await?;
        let logs = log_rows.into_iter().map(agent_log_from_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RunBundle { run, recommendations, skus, logs }))
    }
}

async fn insert_recommendation(
    tx: &mut Transaction<'_, Sqlite>,
    recommendation: &RoutingRecommendation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO routing_recommendations (
            id, routing_run_id, business_unit_id, bu_code, role, rank,
            rule_score, final_score, confidence, reason_summary
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&recommendation.id.0)
    .bind(&recommendation.routing_run_id.0)
    .bind(&recommendation.business_unit_id.0)
    .bind(&recommendation.bu_code)
    .bind(recommendation.role.as_str())
    .bind(i64::from(recommendation.rank))
    .bind(recommendation.rule_score)
    .bind(recommendation.final_score)
    .bind(recommendation.confidence)
    .bind(&recommendation.reason_summary)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_recommendation_sku(
    tx: &mut Transaction<'_, Sqlite>,
    sku: &RecommendationSku,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO recommendation_skus (recommendation_id, bu_sku_id, rank, confidence, rationale)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&sku.recommendation_id.0)
    .bind(&sku.bu_sku_id.0)
    .bind(i64::from(sku.rank))
    .bind(sku.confidence)
    .bind(&sku.rationale)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_agent_log(
    tx: &mut Transaction<'_, Sqlite>,
    log: &AgentLogEntry,
) -> Result<(), RepositoryError> {
    let evidence_refs_json = serde_json::to_string(&log.evidence_refs).map_err(|error| {
        RepositoryError::Decode(format!("could not encode evidence refs: {error}"))
    })?;

    sqlx::query(
        "INSERT INTO agent_logs (
            id, routing_run_id, agent_id, recipient_id, message_type, content,
            evidence_refs_json, created_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&log.id)
    .bind(&log.routing_run_id.0)
    .bind(&log.agent_id)
    .bind(log.recipient_id.as_deref())
    .bind(log.message_type.as_str())
    .bind(&log.content)
    .bind(evidence_refs_json)
    .bind(log.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Creates a pending assignment unless a live one already covers the
/// (lead, BU) pair. Re-running a lead therefore never duplicates work the
/// BUs have already accepted.
async fn ensure_assignment(
    tx: &mut Transaction<'_, Sqlite>,
    lead_id: &LeadId,
    recommendation: &RoutingRecommendation,
) -> Result<(), RepositoryError> {
    let existing = sqlx::query(
        "SELECT id FROM assignments
         WHERE lead_id = ? AND business_unit_id = ?
           AND status IN ('pending_synergy', 'approved', 'dispatched')",
    )
    .bind(&lead_id.0)
    .bind(&recommendation.business_unit_id.0)
    .fetch_optional(&mut **tx)
    .await?;

    if existing.is_some() {
        return Ok(());
    }

    let assignment = Assignment::pending(
        lead_id.clone(),
        recommendation.business_unit_id.clone(),
        recommendation.id.clone(),
        recommendation.role,
    );

    sqlx::query(
        "INSERT INTO assignments (
            id, lead_id, business_unit_id, routing_recommendation_id,
            assigned_role, status, approved_by, approved_at, dispatched_at,
            decision_reason, created_at, updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, ?, ?)",
    )
    .bind(&assignment.id.0)
    .bind(&assignment.lead_id.0)
    .bind(&assignment.business_unit_id.0)
    .bind(&assignment.routing_recommendation_id.0)
    .bind(assignment.assigned_role.as_str())
    .bind(assignment.status.as_str())
    .bind(assignment.created_at.to_rfc3339())
    .bind(assignment.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn run_from_row(row: SqliteRow) -> Result<RoutingRun, RepositoryError> {
    Ok(RoutingRun {
        id: RoutingRunId(row.try_get("id")?),
        lead_id: LeadId(row.try_get("lead_id")?),
        status: RunStatus::parse(&row.try_get::<String, _>("status")?),
        engine_version: row.try_get("engine_version")?,
        last_error: row.try_get("last_error")?,
        started_at: parse_timestamp("started_at", row.try_get("started_at")?)?,
        finished_at: parse_optional_timestamp("finished_at", row.try_get("finished_at")?)?,
    })
}

fn recommendation_from_row(row: SqliteRow) -> Result<RoutingRecommendation, RepositoryError> {
    Ok(RoutingRecommendation {
        id: RecommendationId(row.try_get("id")?),
        routing_run_id: RoutingRunId(row.try_get("routing_run_id")?),
        business_unit_id: BusinessUnitId(row.try_get("business_unit_id")?),
        bu_code: row.try_get("bu_code")?,
        role: RoutingRole::parse(&row.try_get::<String, _>("role")?),
        rank: parse_u32("rank", row.try_get("rank")?)?,
        rule_score: row.try_get("rule_score")?,
        final_score: row.try_get("final_score")?,
        confidence: row.try_get("confidence")?,
        reason_summary: row.try_get("reason_summary")?,
    })
}

fn recommendation_sku_from_row(row: SqliteRow) -> Result<RecommendationSku, RepositoryError> {
    Ok(RecommendationSku {
        recommendation_id: RecommendationId(row.try_get("recommendation_id")?),
        bu_sku_id: BuSkuId(row.try_get("bu_sku_id")?),
        rank: parse_u32("rank", row.try_get("rank")?)?,
        confidence: row.try_get("confidence")?,
        rationale: row.try_get("rationale")?,
    })
}

fn agent_log_from_row(row: SqliteRow) -> Result<AgentLogEntry, RepositoryError> {
    let evidence_refs_json = row.try_get::<String, _>("evidence_refs_json")?;
    let evidence_refs: Vec<EvidenceRef> =
        serde_json::from_str(&evidence_refs_json).map_err(|error| {
            RepositoryError::Decode(format!("invalid evidence refs JSON: {error}"))
        })?;

    Ok(AgentLogEntry {
        id: row.try_get("id")?,
        routing_run_id: RoutingRunId(row.try_get("routing_run_id")?),
        agent_id: row.try_get("agent_id")?,
        recipient_id: row.try_get("recipient_id")?,
        message_type: AgentMessageType::parse(&row.try_get::<String, _>("message_type")?),
        content: row.try_get("content")?,
        evidence_refs,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
