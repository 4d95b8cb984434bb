//! Minimal axum surface: the `/ws` upgrade and a health endpoint. The
//! broader HTTP/REST API (auth, uploads, the web front-end) is out of
//! scope per spec.md §1; this is only the §6.1 control channel plus
//! enough plumbing to exercise it.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use uuid::Uuid;

use kh_models::TaskStatus;
use kh_protocol::{AckPayload, ClientMessage, ServerMessage};
use kh_scheduler::task_state_machine;

use crate::connection::handle_agent_session;
use crate::error::ControllerError;
use crate::event_bus::RealTimeEvent;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    agent_id: i64,
}

/// Connection bootstrap. Real deployments authenticate the agent here
/// (client certificate or API key from claim-code registration, spec.md
/// §4.6); that surface is explicitly out of scope, so the agent id is
/// taken directly from the query string.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_session(socket, state, query.agent_id))
}

/// Route one parsed inbound message to its handler. Exhaustive match
/// over the tagged union, per spec.md §9's "dynamic JSON dispatch"
/// re-architecture note.
#[tracing::instrument(skip(state, message))]
pub async fn handle_client_message(
    state: &AppState,
    agent_id: i64,
    request_id: Option<Uuid>,
    message: ClientMessage,
) -> Result<(), ControllerError> {
    match message {
        ClientMessage::Heartbeat(payload) => {
            let mut agent = state.store.get_agent(agent_id).await?;
            agent.last_heartbeat = Some(payload.timestamp);
            state.store.upsert_agent(agent).await?;
            let _ = state
                .send_to_agent_with_request_id(agent_id, request_id, ServerMessage::Ack(AckPayload { task_id: None }))
                .await;
        }
        ClientMessage::DeviceMetrics(payload) => {
            let mut agent = state.store.get_agent(agent_id).await?;
            agent.devices = payload.devices;
            state.store.upsert_agent(agent).await?;
        }
        ClientMessage::TaskProgress(payload) => {
            task_state_machine::apply_progress(
                state.store.as_ref(),
                payload.task_id,
                payload.keyspace_processed,
                payload.progress_percent,
            )
            .await?;
            state.event_bus.emit(RealTimeEvent::TaskProgress {
                task_id: payload.task_id,
                progress_percent: payload.progress_percent,
            });
        }
        ClientMessage::TaskStatusUpdate(payload) => {
            let status = match payload.status.as_str() {
                "completed" => TaskStatus::Completed,
                "failed" => TaskStatus::Failed,
                "stopped" | "cancelled" => TaskStatus::Cancelled,
                other => return Err(ControllerError::Validation(format!("unknown terminal status {other}"))),
            };
            task_state_machine::apply_terminal_status(
                state.store.as_ref(),
                payload.task_id,
                status,
                payload.final_processed,
                payload.crack_count,
                payload.error_message,
            )
            .await?;
            state.event_bus.emit(RealTimeEvent::TaskCompleted {
                task_id: payload.task_id,
                crack_count: payload.crack_count,
            });
            let _ = state
                .send_to_agent_with_request_id(
                    agent_id,
                    request_id,
                    ServerMessage::Ack(AckPayload { task_id: Some(payload.task_id) }),
                )
                .await;
        }
        ClientMessage::BenchmarkResult(_payload) => {
            // Benchmark cache update: out of this crate's persisted scope
            // (spec.md §6.4 names counters, not a benchmark-cache schema);
            // the dispatcher reads the cache via `JobContext::benchmark_speeds`
            // which a deployment populates from this message.
        }
        ClientMessage::FileSyncRequest(_payload) => {
            // File download/serving is filesystem plumbing, out of scope
            // per spec.md §1.
        }
        ClientMessage::StateSync(payload) => {
            tracing::info!(agent_id, known_tasks = payload.known_tasks.len(), "agent reconnect state-sync");
        }
        ClientMessage::Ack(_payload) => {}
    }
    Ok(())
}
