//! Agent Connection, controller side (C7). Grounded on
//! `apps/orchestrator/src/handlers/stream.rs`'s triple-task session
//! architecture: an internal command worker, a downstream sender task
//! (keepalive ping vs. event-bus broadcast), and an upstream receiver
//! task, raced in a final `select!` that aborts whichever two did not
//! finish first.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;

use kh_models::{AgentOfflineBuffer, AgentStatus};
use kh_protocol::{ClientEnvelope, ClientMessage, ServerEnvelope, ServerMessage};

use crate::event_bus::RealTimeEvent;
use crate::state::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Drives one agent's socket for the lifetime of the connection. Returns
/// when the socket closes or a fatal protocol error occurs.
#[tracing::instrument(skip(socket, state), fields(agent_id))]
pub async fn handle_agent_session(socket: WebSocket, state: AppState, agent_id: i64) {
    tracing::Span::current().record("agent_id", agent_id);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<(Option<uuid::Uuid>, ServerMessage)>();
    state.register_agent_outbox(agent_id, outbox_tx).await;
    mark_agent(&state, agent_id, AgentStatus::Active).await;
    state.event_bus.emit(RealTimeEvent::AgentConnected { agent_id });
    cancel_offline_buffer(&state, agent_id).await;

    let mut event_rx = state.event_bus.subscribe();

    // Downstream sender: messages addressed to this agent, plus a
    // keepalive ping on an interval, whichever fires first.
    let downstream_state = state.clone();
    let downstream = tokio::spawn(async move {
        let mut ticker = interval(KEEPALIVE_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
                Some((request_id, msg)) = outbox_rx.recv() => {
                    let envelope = match request_id {
                        Some(id) => ServerEnvelope::with_request_id(msg, id),
                        None => ServerEnvelope::new(msg),
                    };
                    match serde_json::to_string(&envelope) {
                        Ok(text) => {
                            if ws_sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => tracing::error!(%err, "failed to serialize outbound message"),
                    }
                }
                event = event_rx.recv() => {
                    if event.is_err() {
                        break;
                    }
                    // Broadcast events are UI-facing; agents only need the
                    // per-agent outbox above, so we just keep draining the
                    // receiver to avoid lag errors accumulating.
                }
            }
        }
        let _ = downstream_state; // keep the clone's Drop tied to this task's lifetime
    });

    // Upstream receiver: parse each frame into a `ClientMessage` and hand
    // it to the internal command worker.
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<(Option<uuid::Uuid>, ClientMessage)>();
    let upstream = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => {
                        if cmd_tx.send((envelope.request_id, envelope.message)).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "dropping malformed client message"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::info!(%err, "agent socket error, closing session");
                    break;
                }
            }
        }
    });

    // Internal command worker: the only place that mutates the store on
    // behalf of this agent's inbound traffic.
    let worker_state = state.clone();
    let worker = tokio::spawn(async move {
        while let Some((request_id, message)) = cmd_rx.recv().await {
            if let Err(err) = crate::routes::handle_client_message(&worker_state, agent_id, request_id, message).await {
                tracing::warn!(%err, "error handling client message");
            }
        }
    });

    tokio::select! {
        _ = downstream => {}
        _ = upstream => {}
        _ = worker => {}
    }

    mark_agent(&state, agent_id, AgentStatus::Inactive).await;
    state.remove_agent_outbox(agent_id).await;
    state.event_bus.emit(RealTimeEvent::AgentDisconnected { agent_id });
    open_offline_buffer(&state, agent_id).await;
}


async fn mark_agent(state: &AppState, agent_id: i64, status: AgentStatus) {
    if let Ok(mut agent) = state.store.get_agent(agent_id).await {
        agent.status = status;
        if status == AgentStatus::Active {
            agent.last_heartbeat = Some(Utc::now());
        }
        let _ = state.store.upsert_agent(agent).await;
    }
}

async fn open_offline_buffer(state: &AppState, agent_id: i64) {
    let grace = chrono::Duration::seconds(state.config.offline_grace_seconds as i64);
    let buffer = AgentOfflineBuffer::new(agent_id, Utc::now(), grace);
    let _ = state.store.upsert_offline_buffer(buffer).await;
}

async fn cancel_offline_buffer(state: &AppState, agent_id: i64) {
    if let Ok(Some(mut buffer)) = state.store.get_offline_buffer(agent_id).await {
        if buffer.mark_reconnected(Utc::now()) {
            let _ = state.store.upsert_offline_buffer(buffer).await;
        }
    }
}
