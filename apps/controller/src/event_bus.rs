//! Real-time event fan-out for connected agent sessions and UI observers.
//! Grounded on `apps/orchestrator/src/services/event_bus.rs`: a
//! `broadcast::Sender` with a fixed capacity, graceful handling of the
//! zero-subscriber case.

use tokio::sync::broadcast;
use uuid::Uuid;

use kh_models::OrphanCleanupPhase;

const CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub enum RealTimeEvent {
    AgentConnected { agent_id: i64 },
    AgentDisconnected { agent_id: i64 },
    AgentOffline { agent_id: i64 },
    TaskAssigned { task_id: Uuid, agent_id: i64 },
    TaskProgress { task_id: Uuid, progress_percent: f64 },
    TaskCompleted { task_id: Uuid, crack_count: u64 },
    JobCompleted { job_id: Uuid },
    /// Streamed to the UI while a hashlist's orphaned hashes are reaped
    /// (spec.md §4.8).
    HashlistCleanupProgress { hashlist_id: i64, phase: OrphanCleanupPhase },
}

pub struct EventBus {
    sender: broadcast::Sender<RealTimeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { sender }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealTimeEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RealTimeEvent) {
        let receivers = self.sender.receiver_count();
        if receivers == 0 {
            tracing::trace!(?event, "no subscribers, dropping event");
            return;
        }
        if let Err(err) = self.sender.send(event) {
            tracing::debug!(%err, "event bus send failed, channel closed");
        }
    }
}
