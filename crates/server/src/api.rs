//! HTTP surface: route triggering, step and assignment decisions, and the
//! live/replay event streams. Internal failure detail never leaves the
//! process; error bodies carry a sanitized message plus a correlation id
//! that matches the server log line.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use leadroute_agent::{BuOrchestrator, HttpLlmClient, LlmConversationStrategy};
use leadroute_core::config::{AppConfig, LlmConfig, RoutingEngine};
use leadroute_core::domain::assignment::AssignmentId;
use leadroute_core::domain::delegation::{DelegationStepId, StepDecisionRequest};
use leadroute_core::domain::fact::LeadId;
use leadroute_core::domain::routing::RoutingRunId;
use leadroute_core::errors::{ApplicationError, InterfaceError};
use leadroute_core::events::EventSink;
use leadroute_db::repositories::{
    AssignmentRepository, RunOutcome, SqlAssignmentRepository,
};
use leadroute_db::DbPool;
use leadroute_delegation::{DelegationDriver, DelegationError, HttpDelegationClient};

use crate::health;
use crate::routing::{RoutingCoordinator, RoutingError};
use crate::sse::{self, EventHub};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub event_hub: Arc<EventHub>,
}

pub fn router(state: AppState) -> Router {
    let db_pool = state.db_pool.clone();
    Router::new()
        .route("/api/v1/leads/{lead_id}/route", post(route_lead))
        .route("/api/v1/leads/{lead_id}/events", get(lead_events))
        .route("/api/v1/runs/{run_id}/replay", get(replay_run))
        .route("/api/v1/steps/{step_id}/decision", post(decide_step))
        .route("/api/v1/assignments/{assignment_id}/decision", post(decide_assignment))
        .with_state(state)
        .merge(health::router(db_pool))
}

#[derive(Debug, Default, Deserialize)]
pub struct RouteRequest {
    #[serde(default)]
    pub engine: Option<RoutingEngine>,
    #[serde(default)]
    pub triggered_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RouteResponse {
    pub routing_run_id: String,
    pub lead_id: String,
    pub engine: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub recommendations: Vec<RecommendationView>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationView {
    pub bu_code: String,
    pub role: String,
    pub rank: u32,
    pub final_score: f64,
    pub confidence: f64,
    pub reason_summary: String,
}

#[derive(Debug, Serialize)]
pub struct StepDecisionResponse {
    pub session_id: String,
    pub routing_run_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentDecisionRequest {
    pub action: AssignmentAction,
    #[serde(default)]
    pub decided_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Approve,
    Dispatch,
    Cancel,
    Reject,
}

#[derive(Debug, Serialize)]
pub struct AssignmentView {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub async fn route_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
    body: Option<Json<RouteRequest>>,
) -> Result<(StatusCode, Json<RouteResponse>), ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let engine = request.engine.unwrap_or(state.config.routing.engine);
    let lead_id = LeadId(lead_id);

    match engine {
        RoutingEngine::Deterministic => {
            let coordinator = RoutingCoordinator::new(
                state.db_pool.clone(),
                build_orchestrator(&state.config.llm),
                state.event_hub.clone() as Arc<dyn EventSink>,
                &state.config.routing,
            );
            let outcome =
                coordinator.route_lead(&lead_id).await.map_err(routing_error_response)?;
            Ok((StatusCode::OK, Json(deterministic_response(lead_id, outcome))))
        }
        RoutingEngine::Delegation => {
            let driver = delegation_driver(&state)?;
            let triggered_by = request.triggered_by.as_deref().unwrap_or("api");
            let session = driver
                .start_run(&lead_id, triggered_by)
                .await
                .map_err(delegation_error_response)?;
            Ok((
                StatusCode::ACCEPTED,
                Json(RouteResponse {
                    routing_run_id: session.routing_run_id.0.clone(),
                    lead_id: lead_id.0,
                    engine: "delegation".to_string(),
                    status: session.status.as_str().to_string(),
                    session_id: Some(session.id.0),
                    recommendations: Vec::new(),
                }),
            ))
        }
    }
}

pub async fn lead_events(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
) -> impl IntoResponse {
    sse::live_stream(&state.event_hub, LeadId(lead_id))
}

pub async fn replay_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let run_id = RoutingRunId(run_id);
    match sse::replay_run(&state.db_pool, &run_id).await {
        Ok(Some(events)) => {
            let pacing = Duration::from_millis(state.config.routing.step_pacing_ms);
            sse::paced_stream(events, pacing).into_response()
        }
        Ok(None) => not_found(format!("routing run {} not found", run_id.0)).into_response(),
        Err(error) => {
            sanitized(ApplicationError::Persistence(error.to_string())).into_response()
        }
    }
}

pub async fn decide_step(
    State(state): State<AppState>,
    Path(step_id): Path<String>,
    Json(request): Json<StepDecisionRequest>,
) -> Result<(StatusCode, Json<StepDecisionResponse>), ApiError> {
    let driver = delegation_driver(&state)?;
    let session = driver
        .decide_step(&DelegationStepId(step_id), &request)
        .await
        .map_err(delegation_error_response)?;

    Ok((
        StatusCode::OK,
        Json(StepDecisionResponse {
            session_id: session.id.0,
            routing_run_id: session.routing_run_id.0,
            status: session.status.as_str().to_string(),
        }),
    ))
}

pub async fn decide_assignment(
    State(state): State<AppState>,
    Path(assignment_id): Path<String>,
    Json(request): Json<AssignmentDecisionRequest>,
) -> Result<(StatusCode, Json<AssignmentView>), ApiError> {
    let repository = SqlAssignmentRepository::new(state.db_pool.clone());
    let assignment_id = AssignmentId(assignment_id);
    let mut assignment = repository
        .find_by_id(&assignment_id)
        .await
        .map_err(|error| sanitized(ApplicationError::Persistence(error.to_string())))?
        .ok_or_else(|| not_found(format!("assignment {} not found", assignment_id.0)))?;

    let transition = match request.action {
        AssignmentAction::Approve => match request.decided_by.as_deref().map(str::trim) {
            Some(decided_by) if !decided_by.is_empty() => assignment.approve(decided_by),
            _ => return Err(bad_request("approval requires decided_by".to_string())),
        },
        AssignmentAction::Dispatch => assignment.dispatch(),
        AssignmentAction::Cancel => assignment.cancel(request.reason.as_deref()),
        AssignmentAction::Reject => assignment.reject(request.reason.as_deref()),
    };
    transition.map_err(|error| bad_request(error.to_string()))?;

    repository
        .save(assignment.clone())
        .await
        .map_err(|error| sanitized(ApplicationError::Persistence(error.to_string())))?;

    Ok((
        StatusCode::OK,
        Json(AssignmentView {
            id: assignment.id.0,
            status: assignment.status.as_str().to_string(),
            approved_by: assignment.approved_by,
            decision_reason: assignment.decision_reason,
        }),
    ))
}

fn build_orchestrator(config: &LlmConfig) -> BuOrchestrator {
    match HttpLlmClient::from_config(config) {
        Ok(Some(client)) => {
            BuOrchestrator::with_strategy(Arc::new(LlmConversationStrategy::new(Arc::new(client))))
        }
        Ok(None) => BuOrchestrator::deterministic(),
        Err(error) => {
            tracing::warn!(
                event_name = "routing.llm.client_unavailable",
                error = %error,
                "LLM client could not be built, using deterministic conversations"
            );
            BuOrchestrator::deterministic()
        }
    }
}

fn delegation_driver(
    state: &AppState,
) -> Result<DelegationDriver<HttpDelegationClient>, ApiError> {
    let transport = HttpDelegationClient::from_config(&state.config.delegation)
        .map_err(|error| sanitized(ApplicationError::Configuration(error.to_string())))?;
    Ok(DelegationDriver::new(
        transport,
        state.db_pool.clone(),
        state.event_hub.clone() as Arc<dyn EventSink>,
    ))
}

fn deterministic_response(lead_id: LeadId, outcome: RunOutcome) -> RouteResponse {
    RouteResponse {
        routing_run_id: outcome.run_id.0,
        lead_id: lead_id.0,
        engine: "deterministic".to_string(),
        status: "completed".to_string(),
        session_id: None,
        recommendations: outcome
            .bu_outcomes
            .iter()
            .map(|bu_outcome| RecommendationView {
                bu_code: bu_outcome.recommendation.bu_code.clone(),
                role: bu_outcome.recommendation.role.as_str().to_string(),
                rank: bu_outcome.recommendation.rank,
                final_score: bu_outcome.recommendation.final_score,
                confidence: bu_outcome.recommendation.confidence,
                reason_summary: bu_outcome.recommendation.reason_summary.clone(),
            })
            .collect(),
    }
}

fn routing_error_response(error: RoutingError) -> ApiError {
    match error {
        RoutingError::LeadNotFound(id) => not_found(format!("lead {id} not found")),
        RoutingError::Repository(error) => {
            sanitized(ApplicationError::Persistence(error.to_string()))
        }
    }
}

fn delegation_error_response(error: DelegationError) -> ApiError {
    match error {
        DelegationError::Domain(domain) => bad_request(domain.to_string()),
        DelegationError::LeadNotFound(id) => not_found(format!("lead {id} not found")),
        DelegationError::SessionNotFound(id) => {
            not_found(format!("delegation session {id} not found"))
        }
        DelegationError::StepNotFound(id) => not_found(format!("delegation step {id} not found")),
        DelegationError::Repository(error) => {
            sanitized(ApplicationError::Persistence(error.to_string()))
        }
        DelegationError::Remote(error) => sanitized(ApplicationError::Integration(error)),
        DelegationError::SessionEnded { status, .. } => (
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: format!("delegation session ended {status}"),
                correlation_id: Uuid::new_v4().to_string(),
            }),
        ),
    }
}

/// Internal failures are logged with full detail and surfaced with the
/// user-safe message only.
fn sanitized(error: ApplicationError) -> ApiError {
    let correlation_id = Uuid::new_v4().to_string();
    tracing::error!(
        event_name = "api.request.failed",
        correlation_id = %correlation_id,
        error = %error,
        "request failed"
    );
    let interface = error.into_interface(correlation_id.clone());
    let status = match interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: interface.user_message().to_string(), correlation_id }))
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: message, correlation_id: Uuid::new_v4().to_string() }),
    )
}

fn not_found(message: String) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody { error: message, correlation_id: Uuid::new_v4().to_string() }),
    )
}
