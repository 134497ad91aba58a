//! Live event hub and persisted-run replay.
//!
//! The hub is a broadcast channel implementing [`EventSink`], so both
//! routing engines stream through it without knowing whether anyone is
//! watching. Replay rebuilds the same event vocabulary from persisted rows
//! and streams it with artificial pacing, so a consumer cannot tell a
//! replayed run from a live one by shape.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use leadroute_agent::bu_agent_id;
use leadroute_core::domain::fact::LeadId;
use leadroute_core::domain::routing::{RoutingRole, RoutingRunId, RunStatus};
use leadroute_core::events::{EventSink, RoutingEvent, RoutingEventKind, SkuProposalEvent};
use leadroute_db::repositories::{
    BusinessUnitRepository, FactRepository, RepositoryError, RunBundle,
    SqlBusinessUnitRepository, SqlFactRepository, SqlRoutingStore,
};
use leadroute_db::DbPool;

pub struct EventHub {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventHub {
    fn emit(&self, event: RoutingEvent) {
        // No subscribers is not an error; every event is also persisted.
        let _ = self.sender.send(event);
    }
}

/// SSE stream of live events for one lead. Lagged subscribers skip ahead
/// rather than erroring out.
pub fn live_stream(
    hub: &EventHub,
    lead_id: LeadId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(hub.subscribe()).filter_map(move |received| {
        let event = received.ok()?;
        if event.lead_id != lead_id {
            return None;
        }
        Some(Ok(sse_event(&event)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// SSE stream replaying an already-built event list with a fixed delay
/// between events.
pub fn paced_stream(
    events: Vec<RoutingEvent>,
    pacing: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = tokio_stream::iter(events).then(move |event| async move {
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
        Ok(sse_event(&event))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(event: &RoutingEvent) -> Event {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(event.kind.type_name()).data(payload)
}

/// Rebuilds the event sequence of a persisted run. Returns `None` when the
/// run does not exist.
pub async fn replay_run(
    pool: &DbPool,
    run_id: &RoutingRunId,
) -> Result<Option<Vec<RoutingEvent>>, RepositoryError> {
    let store = SqlRoutingStore::new(pool.clone());
    let Some(bundle) = store.load_run_bundle(run_id).await? else {
        return Ok(None);
    };

    let units = SqlBusinessUnitRepository::new(pool.clone());
    let mut sku_codes: BTreeMap<String, String> = BTreeMap::new();
    for recommendation in &bundle.recommendations {
        for sku in units.skus_for_unit(&recommendation.business_unit_id).await? {
            sku_codes.insert(sku.id.0, sku.code);
        }
    }

    let fact_count =
        SqlFactRepository::new(pool.clone()).facts_for_lead(&bundle.run.lead_id).await?.len();

    Ok(Some(rebuild_events(&bundle, fact_count, &sku_codes)))
}

fn rebuild_events(
    bundle: &RunBundle,
    fact_count: usize,
    sku_codes: &BTreeMap<String, String>,
) -> Vec<RoutingEvent> {
    let lead_id = &bundle.run.lead_id;
    let run_id = &bundle.run.id;
    let wrap = |kind: RoutingEventKind| RoutingEvent::now(lead_id.clone(), run_id.clone(), kind);

    let mut events = vec![wrap(RoutingEventKind::RoutingStarted {
        engine: bundle.run.engine_version.clone(),
        fact_count,
    })];

    let mut replayed_log_ids: Vec<&str> = Vec::new();
    for recommendation in &bundle.recommendations {
        events.push(wrap(RoutingEventKind::RecommendationSelected {
            bu_code: recommendation.bu_code.clone(),
            role: recommendation.role.as_str().to_string(),
            rank: recommendation.rank,
            final_score: recommendation.final_score,
        }));

        let bu_agent = bu_agent_id(&recommendation.bu_code);
        for log in &bundle.logs {
            let belongs = log.agent_id == bu_agent
                || log.recipient_id.as_deref() == Some(bu_agent.as_str());
            if !belongs {
                continue;
            }
            replayed_log_ids.push(log.id.as_str());
            events.push(wrap(RoutingEventKind::AgentTyping { agent_id: log.agent_id.clone() }));
            events.push(wrap(RoutingEventKind::AgentMessage {
                agent_id: log.agent_id.clone(),
                message_type: log.message_type.as_str().to_string(),
                content: log.content.clone(),
            }));
        }

        let proposals: Vec<SkuProposalEvent> = bundle
            .skus
            .iter()
            .filter(|sku| sku.recommendation_id == recommendation.id)
            .map(|sku| SkuProposalEvent {
                sku_code: sku_codes
                    .get(&sku.bu_sku_id.0)
                    .cloned()
                    .unwrap_or_else(|| sku.bu_sku_id.0.clone()),
                rank: sku.rank,
                confidence: sku.confidence,
            })
            .collect();
        if !proposals.is_empty() {
            events.push(wrap(RoutingEventKind::SkuProposals {
                bu_code: recommendation.bu_code.clone(),
                proposals,
            }));
        }
    }

    // Logs not tied to a ranked BU, like the run summary.
    for log in &bundle.logs {
        if replayed_log_ids.contains(&log.id.as_str()) {
            continue;
        }
        events.push(wrap(RoutingEventKind::AgentTyping { agent_id: log.agent_id.clone() }));
        events.push(wrap(RoutingEventKind::AgentMessage {
            agent_id: log.agent_id.clone(),
            message_type: log.message_type.as_str().to_string(),
            content: log.content.clone(),
        }));
    }

    match bundle.run.status {
        RunStatus::Completed => events.push(wrap(RoutingEventKind::RoutingCompleted {
            primary_bu_code: bundle
                .recommendations
                .iter()
                .find(|recommendation| recommendation.role == RoutingRole::Primary)
                .map(|recommendation| recommendation.bu_code.clone()),
            recommendation_count: bundle.recommendations.len(),
        })),
        RunStatus::Failed => events.push(wrap(RoutingEventKind::RoutingFailed {
            reason: bundle
                .run
                .last_error
                .clone()
                .unwrap_or_else(|| "routing run failed".to_string()),
        })),
        RunStatus::Running | RunStatus::Pending => {}
    }

    events
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use leadroute_core::config::AppConfig;
    use leadroute_core::domain::fact::LeadId;
    use leadroute_core::events::{EventSink, NoopEventSink, RoutingEvent, RoutingEventKind};
    use leadroute_db::{connect_with_settings, migrations, RoutingSeedDataset};

    use super::{replay_run, EventHub};
    use crate::routing::RoutingCoordinator;
    use leadroute_agent::BuOrchestrator;

    fn event(lead: &str, kind: RoutingEventKind) -> RoutingEvent {
        RoutingEvent::now(
            LeadId(lead.to_string()),
            leadroute_core::domain::routing::RoutingRunId("run-1".to_string()),
            kind,
        )
    }

    #[tokio::test]
    async fn hub_broadcasts_to_subscribers() {
        let hub = EventHub::new(8);
        let mut receiver = hub.subscribe();

        hub.emit(event(
            "lead-1",
            RoutingEventKind::RoutingStarted { engine: "deterministic-v1".to_string(), fact_count: 3 },
        ));

        let received = receiver.recv().await.expect("receive broadcast event");
        assert_eq!(received.kind.type_name(), "ROUTING_STARTED");
        assert_eq!(received.lead_id.0, "lead-1");
    }

    #[tokio::test]
    async fn emitting_without_subscribers_is_a_no_op() {
        let hub = EventHub::new(8);
        hub.emit(event(
            "lead-1",
            RoutingEventKind::RoutingFailed { reason: "nobody listening".to_string() },
        ));
    }

    #[tokio::test]
    async fn replay_rebuilds_the_full_vocabulary_for_a_completed_run() {
        let pool =
            connect_with_settings("sqlite:sse-replay?mode=memory&cache=shared", 1, 30)
                .await
                .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");
        RoutingSeedDataset::load(&pool).await.expect("load seed fixtures");

        let mut routing = AppConfig::default().routing;
        routing.step_pacing_ms = 0;
        let coordinator = RoutingCoordinator::new(
            pool.clone(),
            BuOrchestrator::deterministic(),
            Arc::new(NoopEventSink),
            &routing,
        );
        let lead_id = LeadId("lead-demo-001".to_string());
        let outcome = coordinator.route_lead(&lead_id).await.expect("route the demo lead");

        let events = replay_run(&pool, &outcome.run_id)
            .await
            .expect("replay query")
            .expect("run exists");

        assert_eq!(events[0].kind.type_name(), "ROUTING_STARTED");
        assert_eq!(events[events.len() - 1].kind.type_name(), "ROUTING_COMPLETED");

        let selected =
            events.iter().filter(|e| e.kind.type_name() == "RECOMMENDATION_SELECTED").count();
        assert_eq!(selected, outcome.bu_outcomes.len());

        let typing = events.iter().filter(|e| e.kind.type_name() == "AGENT_TYPING").count();
        let messages = events.iter().filter(|e| e.kind.type_name() == "AGENT_MESSAGE").count();
        assert_eq!(typing, messages);
        // two conversation messages per BU plus the summary
        assert_eq!(messages, outcome.bu_outcomes.len() * 2 + 1);

        let sku_events =
            events.iter().filter(|e| e.kind.type_name() == "SKU_PROPOSALS").count();
        assert!(sku_events >= 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn replay_of_an_unknown_run_is_none() {
        let pool =
            connect_with_settings("sqlite:sse-replay-missing?mode=memory&cache=shared", 1, 30)
                .await
                .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let replayed = replay_run(
            &pool,
            &leadroute_core::domain::routing::RoutingRunId("run-missing".to_string()),
        )
        .await
        .expect("replay query");
        assert!(replayed.is_none());

        pool.close().await;
    }
}
