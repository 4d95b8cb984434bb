//! JobTask (spec.md §3) and its state machine transitions (C6, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// True for the two states that occupy the agent's single task slot
    /// (spec.md §3 JobTask invariant / §8 property 2).
    pub fn occupies_agent(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailedStatus {
    Pending,
    Benchmarking,
    Running,
    CompletedNoCracks,
    CompletedWithCracks,
    Failed,
    Retrying,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    pub id: Uuid,
    pub chunk_number: u64,
    pub job_id: Uuid,
    pub agent_id: Option<i64>,
    pub increment_layer_id: Option<Uuid>,

    pub keyspace_start: u64,
    pub keyspace_end: u64,
    pub keyspace_processed: u64,
    pub effective_keyspace_start: u64,
    pub effective_keyspace_end: u64,
    pub effective_keyspace_processed: u64,

    pub benchmark_speed: Option<f64>,
    pub chunk_duration: u32,
    pub priority: i32,
    pub attack_cmd: String,

    pub rule_start_index: Option<u64>,
    pub rule_end_index: Option<u64>,
    pub rule_chunk_path: Option<String>,
    pub is_rule_split_task: bool,

    pub status: TaskStatus,
    pub detailed_status: DetailedStatus,
    pub retry_count: u32,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub crack_count: u64,
    pub progress_percent: f64,
}

impl JobTask {
    pub fn validate_range(&self) -> Result<(), String> {
        if self.keyspace_end <= self.keyspace_start {
            return Err("keyspace_end must exceed keyspace_start".into());
        }
        if self.is_rule_split_task {
            match (self.rule_start_index, self.rule_end_index) {
                (Some(s), Some(e)) if e > s => {}
                _ => return Err("rule-split task requires rule_end_index > rule_start_index".into()),
            }
        }
        Ok(())
    }
}

/// A transition rejected by the state machine. See spec.md §4.5: all
/// other code changes status only through these functions.
#[derive(Debug, thiserror::Error)]
#[error("illegal transition from {from:?} via {action}")]
pub struct IllegalTransition {
    pub from: TaskStatus,
    pub action: &'static str,
}

fn require(from: TaskStatus, allowed: &[TaskStatus], action: &'static str) -> Result<(), IllegalTransition> {
    if allowed.contains(&from) {
        Ok(())
    } else {
        Err(IllegalTransition { from, action })
    }
}

pub fn assign(task: &mut JobTask, agent_id: i64, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Pending], "assign")?;
    task.status = TaskStatus::Assigned;
    task.detailed_status = DetailedStatus::Pending;
    task.agent_id = Some(agent_id);
    task.assigned_at = Some(now);
    Ok(())
}

pub fn start(task: &mut JobTask, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Assigned], "start")?;
    task.status = TaskStatus::Running;
    task.detailed_status = DetailedStatus::Running;
    task.started_at = Some(now);
    task.last_checkpoint = Some(now);
    Ok(())
}

pub fn complete(task: &mut JobTask, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Running], "complete")?;
    task.status = TaskStatus::Completed;
    task.detailed_status = if task.crack_count > 0 {
        DetailedStatus::CompletedWithCracks
    } else {
        DetailedStatus::CompletedNoCracks
    };
    task.completed_at = Some(now);
    Ok(())
}

pub fn fail(task: &mut JobTask, now: DateTime<Utc>, message: impl Into<String>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Running], "fail")?;
    task.status = TaskStatus::Failed;
    task.detailed_status = DetailedStatus::Failed;
    task.error_message = Some(message.into());
    task.completed_at = Some(now);
    Ok(())
}

pub fn stop(task: &mut JobTask, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Running], "stop")?;
    task.status = TaskStatus::Cancelled;
    task.completed_at = Some(now);
    Ok(())
}

pub fn cancel_pending(task: &mut JobTask, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Pending], "cancel")?;
    task.status = TaskStatus::Cancelled;
    task.completed_at = Some(now);
    Ok(())
}

/// Mark a task `error` from any of {assigned, running} — the stale-task
/// sweeper and delivery-failure paths both land here.
pub fn error_out(task: &mut JobTask, message: impl Into<String>) -> Result<(), IllegalTransition> {
    require(task.status, &[TaskStatus::Assigned, TaskStatus::Running], "error")?;
    task.status = TaskStatus::Error;
    task.detailed_status = DetailedStatus::Failed;
    task.error_message = Some(message.into());
    Ok(())
}

/// `error -> pending` retry. Returns the `keyspace_processed` that must be
/// subtracted from the job/layer counters by the caller, transactionally
/// (spec.md §4.5).
pub fn retry(task: &mut JobTask, max_retries: u32) -> Result<u64, IllegalTransition> {
    require(task.status, &[TaskStatus::Error], "retry")?;
    if task.retry_count >= max_retries {
        return Err(IllegalTransition { from: task.status, action: "retry (bound exceeded)" });
    }
    let reclaimed = task.keyspace_processed;
    task.status = TaskStatus::Pending;
    task.detailed_status = DetailedStatus::Retrying;
    task.retry_count += 1;
    task.agent_id = None;
    task.assigned_at = None;
    task.started_at = None;
    task.keyspace_processed = 0;
    task.progress_percent = 0.0;
    task.error_message = None;
    Ok(reclaimed)
}
