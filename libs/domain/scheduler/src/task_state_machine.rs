//! Task State Machine (C6) orchestration: wires `kh_models::task`'s pure
//! transitions to the store, so every status change outside this module
//! goes through here (spec.md §9: "a single module owning all task-state
//! transitions"). The transition rules themselves live in
//! `kh_models::task`; this module adds the store reads/writes and the
//! job/layer counter bookkeeping spec.md §4.5 requires alongside them.

use chrono::Utc;
use uuid::Uuid;

use kh_models::task::{self, TaskStatus};
use kh_store::Store;

use crate::errors::SchedulerError;

/// `error -> pending` retry, with the job's `processed_keyspace` (or the
/// owning layer's, if any) reduced by the task's reclaimed keyspace in
/// the same logical operation (spec.md §4.5).
#[tracing::instrument(skip(store))]
pub async fn retry_task(store: &dyn Store, task_id: Uuid, max_retries: u32) -> Result<(), SchedulerError> {
    let mut t = store.get_task(task_id).await?;
    let expected = t.status;
    let reclaimed = task::retry(&mut t, max_retries)?;
    store.transition_task(task_id, expected, t.clone()).await?;

    if let Some(layer_id) = t.increment_layer_id {
        let mut layers = store.list_layers(t.job_id).await?;
        if let Some(layer) = layers.iter_mut().find(|l| l.id == layer_id) {
            layer.processed_keyspace = layer.processed_keyspace.saturating_sub(reclaimed);
            store.upsert_layer(layer.clone()).await?;
        }
    } else {
        let mut job = store.get_job(t.job_id).await?;
        job.processed_keyspace = job.processed_keyspace.saturating_sub(reclaimed);
        store.upsert_job(job).await?;
    }
    Ok(())
}

/// Transition a task to `error` (stale-sweep or delivery-failure path).
#[tracing::instrument(skip(store))]
pub async fn error_out(store: &dyn Store, task_id: Uuid, message: impl Into<String> + std::fmt::Debug) -> Result<(), SchedulerError> {
    let mut t = store.get_task(task_id).await?;
    let expected = t.status;
    task::error_out(&mut t, format!("{message:?}"))?;
    store.transition_task(task_id, expected, t).await?;
    Ok(())
}

/// Apply an incoming `task_progress` update (spec.md §4.7): rejects
/// regressions, otherwise advances `keyspace_processed` and the job's
/// `processed_keyspace` by the delta.
#[tracing::instrument(skip(store))]
pub async fn apply_progress(store: &dyn Store, task_id: Uuid, keyspace_processed: u64, progress_percent: f64) -> Result<(), SchedulerError> {
    let mut t = store.get_task(task_id).await?;
    if keyspace_processed < t.keyspace_processed {
        tracing::warn!(%task_id, "dropping out-of-order progress update");
        return Ok(());
    }
    let delta = keyspace_processed - t.keyspace_processed;
    let expected = t.status;
    t.keyspace_processed = keyspace_processed;
    t.progress_percent = progress_percent;
    t.last_checkpoint = Some(Utc::now());
    store.transition_task(task_id, expected, t.clone()).await?;

    if delta > 0 {
        if let Some(layer_id) = t.increment_layer_id {
            let mut layers = store.list_layers(t.job_id).await?;
            if let Some(layer) = layers.iter_mut().find(|l| l.id == layer_id) {
                layer.processed_keyspace += delta;
                store.upsert_layer(layer.clone()).await?;
            }
        } else {
            let mut job = store.get_job(t.job_id).await?;
            job.processed_keyspace += delta;
            store.upsert_job(job).await?;
        }
    }
    Ok(())
}

/// Apply a terminal `task_status_update` (spec.md §4.7/§6.1).
#[tracing::instrument(skip(store))]
pub async fn apply_terminal_status(
    store: &dyn Store,
    task_id: Uuid,
    status: TaskStatus,
    final_processed: u64,
    crack_count: u64,
    error_message: Option<String>,
) -> Result<(), SchedulerError> {
    let mut t = store.get_task(task_id).await?;
    let expected = t.status;
    t.crack_count = crack_count;
    let now = Utc::now();
    match status {
        TaskStatus::Completed => {
            t.keyspace_processed = final_processed;
            task::complete(&mut t, now)?;
        }
        TaskStatus::Failed => {
            task::fail(&mut t, now, error_message.unwrap_or_default())?;
        }
        TaskStatus::Cancelled => {
            task::stop(&mut t, now)?;
        }
        other => return Err(SchedulerError::NotATerminalStatus(other)),
    }
    store.transition_task(task_id, expected, t).await?;
    Ok(())
}
