//! Agent side of the controller<->agent channel (C7, client half).
//! Grounded on the controller's own `connection.rs` triple-task session
//! shape — a downstream sender, an upstream receiver, and an internal
//! command worker, raced in a final `select!` — adapted to a
//! `tokio-tungstenite` client with a reconnect/backoff loop wrapped
//! around the whole session (spec.md §6.3).

use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use kh_protocol::{
    AckPayload, ClientEnvelope, ClientMessage, DeviceMetricsPayload, HeartbeatPayload, ServerEnvelope, ServerMessage,
    StateSyncPayload,
};

use crate::config::{AgentConfig, Credentials};
use crate::error::AgentError;
use crate::metrics;
use crate::mock_executor::{self, ExecutorEvent};
use crate::progress_pipeline::ProgressPipeline;
use crate::task_state_manager::TaskSlot;

const RETRY_TICK: Duration = Duration::from_secs(3);

/// Runs the agent for its entire lifetime: connect, run one session to
/// completion, back off, reconnect — until `shutdown` resolves.
pub async fn run(
    config: AgentConfig,
    credentials: Credentials,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) {
    let mut backoff = Duration::from_secs(config.reconnect_backoff_seconds);
    let cap = Duration::from_secs(config.reconnect_backoff_cap_seconds);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown requested, not reconnecting");
                return;
            }
            result = run_session(&config, &credentials) => {
                match result {
                    Ok(()) => {
                        tracing::info!("session ended cleanly");
                        backoff = Duration::from_secs(config.reconnect_backoff_seconds);
                    }
                    Err(err) => {
                        tracing::warn!(%err, backoff_seconds = backoff.as_secs(), "session ended, reconnecting");
                    }
                }
            }
        }

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(cap);
    }
}

async fn run_session(config: &AgentConfig, credentials: &Credentials) -> Result<(), AgentError> {
    let url = format!("{}?agent_id={}", config.controller_url(), credentials.agent_id);
    let (stream, _response) = tokio_tungstenite::connect_async(&url).await?;
    tracing::info!(agent_id = credentials.agent_id, "connected to controller");
    let (mut ws_sender, mut ws_receiver) = stream.split();

    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<(Option<Uuid>, ClientMessage)>();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<(Option<Uuid>, ServerMessage)>();

    // Announce what we already know about in case the controller lost
    // track of an in-flight task across the disconnect.
    let _ = outbox_tx.send((None, ClientMessage::StateSync(StateSyncPayload { known_tasks: Vec::new() })));

    let heartbeat_agent_id = credentials.agent_id;
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_seconds as u64);
    let downstream = tokio::spawn(async move {
        let mut heartbeat = interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let host_metrics = metrics::capture();
                    let msg = ClientMessage::Heartbeat(HeartbeatPayload {
                        agent_id: heartbeat_agent_id,
                        timestamp: Utc::now(),
                        metrics: Some(DeviceMetricsPayload {
                            agent_id: heartbeat_agent_id,
                            devices: vec![metrics::host_device_info(&host_metrics)],
                            load_average: host_metrics.load_average,
                            memory_used_bytes: host_metrics.memory_used_bytes,
                            memory_total_bytes: host_metrics.memory_total_bytes,
                        }),
                    });
                    if send(&mut ws_sender, None, msg).await.is_err() {
                        break;
                    }
                }
                maybe = outbox_rx.recv() => {
                    match maybe {
                        Some((request_id, msg)) => {
                            if send(&mut ws_sender, request_id, msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let upstream = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEnvelope>(&text) {
                    Ok(envelope) => {
                        if cmd_tx.send((envelope.request_id, envelope.message)).is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(%err, "dropping malformed server message"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    tracing::info!(%err, "socket error, closing session");
                    break;
                }
            }
        }
    });

    let agent_id = credentials.agent_id;
    let worker = tokio::spawn(async move {
        worker_loop(agent_id, cmd_rx, outbox_tx).await;
    });

    tokio::select! {
        _ = downstream => {}
        _ = upstream => {}
        _ = worker => {}
    }

    Ok(())
}

async fn send(
    sender: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    request_id: Option<Uuid>,
    message: ClientMessage,
) -> Result<(), AgentError> {
    let envelope = match request_id {
        Some(id) => ClientEnvelope::with_request_id(message, id),
        None => ClientEnvelope::new(message),
    };
    let text = serde_json::to_string(&envelope)?;
    sender.send(Message::Text(text)).await?;
    Ok(())
}

/// The single-task command loop: holds the task slot and progress
/// pipeline, reacting to controller commands and to the mock
/// executor's own events for whichever task is currently running.
async fn worker_loop(
    agent_id: i64,
    mut cmd_rx: mpsc::UnboundedReceiver<(Option<Uuid>, ServerMessage)>,
    outbox_tx: mpsc::UnboundedSender<(Option<Uuid>, ClientMessage)>,
) {
    let mut slot = TaskSlot::new();
    let mut pipeline = ProgressPipeline::new();
    let mut executor_rx: Option<mpsc::Receiver<ExecutorEvent>> = None;
    let mut executor_handle: Option<tokio::task::JoinHandle<()>> = None;
    let mut retry_ticker = interval(RETRY_TICK);

    loop {
        tokio::select! {
            maybe_cmd = cmd_rx.recv() => {
                let Some((request_id, command)) = maybe_cmd else { break };
                handle_command(request_id, command, &mut slot, &mut pipeline, &outbox_tx, &mut executor_rx, &mut executor_handle);
            }
            Some(event) = async {
                match executor_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                handle_executor_event(event, &mut slot, &mut pipeline, &outbox_tx, &mut executor_rx, &mut executor_handle);
            }
            _ = retry_ticker.tick() => {
                for (request_id, message) in pipeline.due_for_retry(Utc::now()) {
                    tracing::debug!(%request_id, "resending unacknowledged message");
                    let _ = outbox_tx.send((Some(request_id), message));
                }
            }
        }
    }

    if let Some(handle) = executor_handle {
        handle.abort();
    }
    tracing::debug!(agent_id, "worker loop exited");
}

fn handle_command(
    request_id: Option<Uuid>,
    command: ServerMessage,
    slot: &mut TaskSlot,
    pipeline: &mut ProgressPipeline,
    outbox_tx: &mpsc::UnboundedSender<(Option<Uuid>, ClientMessage)>,
    executor_rx: &mut Option<mpsc::Receiver<ExecutorEvent>>,
    executor_handle: &mut Option<tokio::task::JoinHandle<()>>,
) {
    match command {
        ServerMessage::TaskAssignment(assignment) => {
            if let Err(err) = slot.accept(assignment.clone()) {
                tracing::warn!(err, "rejected task assignment");
                return;
            }
            let _ = slot.start();
            let speed = 1_000_000.0;
            let (rx, handle) = mock_executor::spawn(
                assignment.task_id,
                assignment.effective_keyspace_start,
                assignment.effective_keyspace_end,
                speed,
            );
            *executor_rx = Some(rx);
            *executor_handle = Some(handle);
        }
        ServerMessage::Stop { task_id } => {
            if let Some(task) = slot.current() {
                if task.assignment.task_id == task_id {
                    let _ = slot.mark_stopped();
                    if let Some(handle) = executor_handle.take() {
                        handle.abort();
                    }
                    *executor_rx = None;
                    let (request_id, message) = pipeline.status_update(task_id, "cancelled", task.keyspace_processed, None);
                    let _ = outbox_tx.send((Some(request_id), message));
                }
            }
        }
        ServerMessage::Ack(AckPayload { task_id }) => {
            if let Some(rid) = request_id {
                pipeline.on_ack(rid);
            }
            let acks_current = slot.current().map(|t| Some(t.assignment.task_id) == task_id).unwrap_or(false);
            if acks_current {
                slot.acknowledge_completion();
            } else {
                slot.clear_if_acknowledged();
            }
        }
        ServerMessage::AgentConfig(_) => {
            tracing::debug!("received updated agent config");
        }
        ServerMessage::BenchmarkRequest(_) | ServerMessage::FileSyncResponse(_) => {
            // Benchmarking and file distribution are out of scope for
            // this subsystem; the controller falls back to its
            // placeholder benchmark speed either way.
            tracing::debug!("ignoring out-of-scope server message");
        }
    }
}

fn handle_executor_event(
    event: ExecutorEvent,
    slot: &mut TaskSlot,
    pipeline: &mut ProgressPipeline,
    outbox_tx: &mpsc::UnboundedSender<(Option<Uuid>, ClientMessage)>,
    executor_rx: &mut Option<mpsc::Receiver<ExecutorEvent>>,
    executor_handle: &mut Option<tokio::task::JoinHandle<()>>,
) {
    let total = slot
        .current()
        .map(|t| t.assignment.effective_keyspace_end - t.assignment.effective_keyspace_start)
        .unwrap_or(0);

    let finished = matches!(event, ExecutorEvent::Finished { .. });
    if let ExecutorEvent::Progress { keyspace_processed, cracked, .. } = &event {
        let _ = slot.record_progress(*keyspace_processed, cracked.len() as u64);
    }

    let (request_id, message) = pipeline.translate(event, total);
    let _ = outbox_tx.send((Some(request_id), message));

    if finished {
        let _ = slot.mark_completed();
        *executor_rx = None;
        if let Some(handle) = executor_handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backoff_doubles_and_caps() {
        let mut backoff = Duration::from_secs(1);
        let cap = Duration::from_secs(10);
        for _ in 0..10 {
            backoff = (backoff * 2).min(cap);
        }
        assert_eq!(backoff, cap);
    }
}
