//! Turns executor events into outbound `ClientMessage`s, deduplicates
//! cracked hashes, and tracks which sent messages are still waiting on
//! an `ack` so they can be retried with backoff (spec.md §4.7's
//! at-least-once delivery requirement over an unreliable socket).

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use kh_protocol::{ClientMessage, CrackedHash, TaskProgressPayload, TaskStatusUpdatePayload};

use crate::mock_executor::ExecutorEvent;

const INITIAL_RETRY: Duration = Duration::from_secs(2);
const MAX_RETRY: Duration = Duration::from_secs(30);

/// A sent message awaiting acknowledgement.
#[derive(Debug, Clone)]
struct PendingAck {
    request_id: Uuid,
    message: ClientMessage,
    sent_at: chrono::DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Default)]
pub struct ProgressPipeline {
    seen_cracks: HashSet<(Uuid, String)>,
    pending: Vec<PendingAck>,
}

impl ProgressPipeline {
    pub fn new() -> Self {
        ProgressPipeline { seen_cracks: HashSet::new(), pending: Vec::new() }
    }

    /// Converts one executor event into the envelope-ready message plus
    /// the `request_id` to tag it with, deduplicating any cracked hashes
    /// already reported for this task.
    pub fn translate(&mut self, event: ExecutorEvent, effective_keyspace_total: u64) -> (Uuid, ClientMessage) {
        let request_id = Uuid::new_v4();
        let message = match event {
            ExecutorEvent::Progress { task_id, keyspace_processed, hash_rate, cracked } => {
                let fresh: Vec<CrackedHash> = cracked
                    .into_iter()
                    .filter(|c| self.seen_cracks.insert((task_id, c.hash_value.clone())))
                    .collect();
                let progress_percent = if effective_keyspace_total == 0 {
                    0.0
                } else {
                    (keyspace_processed as f64 / effective_keyspace_total as f64) * 100.0
                };
                ClientMessage::TaskProgress(TaskProgressPayload {
                    task_id,
                    status: "running".to_string(),
                    keyspace_processed,
                    effective_progress: keyspace_processed,
                    progress_percent,
                    hash_rate,
                    device_metrics: Vec::new(),
                    cracked_hashes: fresh,
                    time_remaining_seconds: None,
                    first_update_marker: false,
                    total_effective_keyspace: Some(effective_keyspace_total),
                })
            }
            ExecutorEvent::Finished { task_id, keyspace_processed } => {
                ClientMessage::TaskStatusUpdate(TaskStatusUpdatePayload {
                    task_id,
                    status: "completed".to_string(),
                    final_processed: keyspace_processed,
                    error_message: None,
                    crack_count: self.crack_count_for(task_id),
                })
            }
        };
        self.pending.push(PendingAck { request_id, message: message.clone(), sent_at: Utc::now(), attempts: 1 });
        (request_id, message)
    }

    pub fn status_update(&mut self, task_id: Uuid, status: &str, final_processed: u64, error_message: Option<String>) -> (Uuid, ClientMessage) {
        let request_id = Uuid::new_v4();
        let message = ClientMessage::TaskStatusUpdate(TaskStatusUpdatePayload {
            task_id,
            status: status.to_string(),
            final_processed,
            error_message,
            crack_count: self.crack_count_for(task_id),
        });
        self.pending.push(PendingAck { request_id, message: message.clone(), sent_at: Utc::now(), attempts: 1 });
        (request_id, message)
    }

    pub fn on_ack(&mut self, request_id: Uuid) {
        self.pending.retain(|p| p.request_id != request_id);
    }

    /// Messages whose backoff window has elapsed, due for resend. Bumps
    /// their attempt counter and `sent_at` as a side effect.
    pub fn due_for_retry(&mut self, now: chrono::DateTime<Utc>) -> Vec<(Uuid, ClientMessage)> {
        let mut due = Vec::new();
        for pending in &mut self.pending {
            let backoff = backoff_for(pending.attempts);
            if now - pending.sent_at >= chrono::Duration::from_std(backoff).unwrap_or_default() {
                pending.attempts += 1;
                pending.sent_at = now;
                due.push((pending.request_id, pending.message.clone()));
            }
        }
        due
    }

    fn crack_count_for(&self, task_id: Uuid) -> u64 {
        self.seen_cracks.iter().filter(|(t, _)| *t == task_id).count() as u64
    }
}

fn backoff_for(attempts: u32) -> Duration {
    let millis = INITIAL_RETRY.as_millis().saturating_mul(1u128 << attempts.min(8));
    Duration::from_millis(millis.min(MAX_RETRY.as_millis()) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_crack_is_reported_once() {
        let mut pipeline = ProgressPipeline::new();
        let task_id = Uuid::new_v4();
        let crack = CrackedHash { hash_value: "abc".into(), plaintext: "pw".into() };

        let (_, first) = pipeline.translate(
            ExecutorEvent::Progress { task_id, keyspace_processed: 10, hash_rate: 100.0, cracked: vec![crack.clone()] },
            100,
        );
        let (_, second) = pipeline.translate(
            ExecutorEvent::Progress { task_id, keyspace_processed: 20, hash_rate: 100.0, cracked: vec![crack] },
            100,
        );

        match first {
            ClientMessage::TaskProgress(p) => assert_eq!(p.cracked_hashes.len(), 1),
            _ => panic!("expected progress message"),
        }
        match second {
            ClientMessage::TaskProgress(p) => assert!(p.cracked_hashes.is_empty()),
            _ => panic!("expected progress message"),
        }
    }

    #[test]
    fn acked_message_is_not_retried() {
        let mut pipeline = ProgressPipeline::new();
        let task_id = Uuid::new_v4();
        let (request_id, _) = pipeline.status_update(task_id, "completed", 100, None);
        pipeline.on_ack(request_id);
        let due = pipeline.due_for_retry(Utc::now() + chrono::Duration::seconds(60));
        assert!(due.is_empty());
    }

    #[test]
    fn unacked_message_is_retried_after_backoff() {
        let mut pipeline = ProgressPipeline::new();
        let task_id = Uuid::new_v4();
        pipeline.status_update(task_id, "completed", 100, None);
        let due = pipeline.due_for_retry(Utc::now() + chrono::Duration::seconds(60));
        assert_eq!(due.len(), 1);
    }
}
