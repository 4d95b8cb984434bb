//! Composition root. Grounded on `apps/orchestrator/src/state/mod.rs`'s
//! `AppState`: a clone-able struct of `Arc`-wrapped fields built once at
//! startup and threaded through every handler and background task.
//! Domain-specific fields from the teacher (billing, ai_cortex, graphql)
//! have no counterpart here and are not replicated.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use kh_protocol::ServerMessage;
use kh_store::Store;

use crate::config::ControllerConfig;
use crate::event_bus::EventBus;

/// Whether the controller is accepting new dispatch work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMode {
    Operational,
    Maintenance(String),
}

/// A live agent session's outbound channel, used by the dispatch loop and
/// reaper to push messages without holding the connection task's socket
/// directly (the triple-task pattern in `connection.rs` owns the socket).
pub type AgentOutbox = mpsc::UnboundedSender<(Option<Uuid>, ServerMessage)>;

pub struct AppState {
    pub config: ControllerConfig,
    pub store: Arc<dyn Store>,
    pub event_bus: Arc<EventBus>,
    pub mode: Arc<RwLock<SystemMode>>,
    pub agent_outboxes: Arc<RwLock<HashMap<i64, AgentOutbox>>>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        AppState {
            config: self.config.clone(),
            store: self.store.clone(),
            event_bus: self.event_bus.clone(),
            mode: self.mode.clone(),
            agent_outboxes: self.agent_outboxes.clone(),
        }
    }
}

impl AppState {
    pub fn new(config: ControllerConfig, store: Arc<dyn Store>) -> Self {
        AppState {
            config,
            store,
            event_bus: Arc::new(EventBus::new()),
            mode: Arc::new(RwLock::new(SystemMode::Operational)),
            agent_outboxes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn is_operational(&self) -> bool {
        matches!(*self.mode.read().await, SystemMode::Operational)
    }

    pub async fn set_mode(&self, mode: SystemMode) {
        *self.mode.write().await = mode;
    }

    pub async fn register_agent_outbox(&self, agent_id: i64, outbox: AgentOutbox) {
        self.agent_outboxes.write().await.insert(agent_id, outbox);
    }

    pub async fn remove_agent_outbox(&self, agent_id: i64) {
        self.agent_outboxes.write().await.remove(&agent_id);
    }

    pub async fn send_to_agent(&self, agent_id: i64, message: ServerMessage) -> Result<(), crate::error::ControllerError> {
        self.send_to_agent_with_request_id(agent_id, None, message).await
    }

    pub async fn send_to_agent_with_request_id(
        &self,
        agent_id: i64,
        request_id: Option<Uuid>,
        message: ServerMessage,
    ) -> Result<(), crate::error::ControllerError> {
        let outboxes = self.agent_outboxes.read().await;
        match outboxes.get(&agent_id) {
            Some(tx) => tx.send((request_id, message)).map_err(|_| crate::error::ControllerError::AgentUnreachable(agent_id)),
            None => Err(crate::error::ControllerError::AgentUnreachable(agent_id)),
        }
    }
}
