//! A deterministic stand-in cracking engine (spec.md §4.7 explicitly
//! scopes the real hashcat invocation out: agents are tested against a
//! synthetic engine that advances keyspace and emits cracks on a fixed
//! schedule). Grounded on the teacher's `engine.rs` compute loop shape —
//! a `tokio::spawn`'d task ticking on an interval and reporting through
//! an mpsc channel — with the actual hash-rate math replaced.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use uuid::Uuid;

use kh_protocol::CrackedHash;

const TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    Progress { task_id: Uuid, keyspace_processed: u64, hash_rate: f64, cracked: Vec<CrackedHash> },
    Finished { task_id: Uuid, keyspace_processed: u64 },
}

/// Runs a synthetic keyspace sweep for `task_id` from `start` to `end`
/// at `hash_rate` keys/sec, emitting a progress tick every 500ms and a
/// `Finished` event when the assigned range is exhausted. Every tenth
/// tick reports one synthetic crack so the progress pipeline's batching
/// path has something to exercise.
pub fn spawn(
    task_id: Uuid,
    start: u64,
    end: u64,
    hash_rate: f64,
) -> (mpsc::Receiver<ExecutorEvent>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(async move {
        let mut ticker = interval(TICK);
        let mut processed: u64 = 0;
        let span = end.saturating_sub(start);
        let per_tick = ((hash_rate * TICK.as_secs_f64()) as u64).max(1);
        let mut tick_count: u64 = 0;

        loop {
            ticker.tick().await;
            tick_count += 1;
            processed = (processed + per_tick).min(span);

            let cracked = if tick_count % 10 == 0 && processed < span {
                vec![CrackedHash {
                    hash_value: format!("{task_id}-{tick_count}"),
                    plaintext: format!("synthetic{tick_count}"),
                }]
            } else {
                Vec::new()
            };

            if tx
                .send(ExecutorEvent::Progress { task_id, keyspace_processed: processed, hash_rate, cracked })
                .await
                .is_err()
            {
                return;
            }

            if processed >= span {
                let _ = tx.send(ExecutorEvent::Finished { task_id, keyspace_processed: processed }).await;
                return;
            }
        }
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_reaches_finished_event() {
        let task_id = Uuid::new_v4();
        let (mut rx, handle) = spawn(task_id, 0, 100, 1000.0);
        let mut saw_finished = false;
        while let Some(event) = rx.recv().await {
            if let ExecutorEvent::Finished { keyspace_processed, .. } = event {
                assert_eq!(keyspace_processed, 100);
                saw_finished = true;
                break;
            }
        }
        assert!(saw_finished);
        handle.abort();
    }
}
