//! Stale-task sweeper and offline-buffer sweeper (C9). Grounded on
//! `apps/orchestrator/src/services/reaper.rs`'s `spawn_reaper`: an
//! interval loop that retains/evicts against an expiry and logs state
//! changes, never aborting the loop on a transient error.

use std::time::Duration;

use kh_models::TaskStatus;
use kh_scheduler::reliability::{is_stale, StaleConfig};
use kh_scheduler::task_state_machine;

use crate::event_bus::RealTimeEvent;
use crate::state::AppState;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub fn spawn_stale_task_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = StaleConfig {
            multiplier: state.config.stale_multiplier,
            cap_seconds: state.config.stale_cap_seconds,
        };
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            let in_flight = match state.store.list_tasks_in_status(&[TaskStatus::Assigned, TaskStatus::Running]).await {
                Ok(tasks) => tasks,
                Err(err) => {
                    tracing::warn!(%err, "stale-task sweep: failed to list in-flight tasks");
                    continue;
                }
            };
            for task in in_flight {
                if !is_stale(&task, now, config) {
                    continue;
                }
                tracing::info!(task_id = %task.id, "marking stale task as errored");
                if let Err(err) = task_state_machine::error_out(state.store.as_ref(), task.id, "stale: no checkpoint within threshold").await {
                    tracing::warn!(%err, "failed to error-out stale task");
                    continue;
                }
                match task_state_machine::retry_task(state.store.as_ref(), task.id, state.config.max_retries).await {
                    Ok(()) => {}
                    Err(err) => tracing::info!(%err, task_id = %task.id, "stale task exhausted its retry budget"),
                }
            }
        }
    })
}

pub fn spawn_offline_buffer_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now();
            let due = match state.store.list_due_offline_buffers(now).await {
                Ok(due) => due,
                Err(err) => {
                    tracing::warn!(%err, "offline-buffer sweep failed");
                    continue;
                }
            };
            for mut buffer in due {
                buffer.notification_sent = true;
                if state.store.upsert_offline_buffer(buffer.clone()).await.is_ok() {
                    state.event_bus.emit(RealTimeEvent::AgentOffline { agent_id: buffer.agent_id });
                }
            }
        }
    })
}
