//! AgentOfflineBuffer (spec.md §3, §4.6, §8 scenario S6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOfflineBuffer {
    pub agent_id: i64,
    pub disconnected_at: DateTime<Utc>,
    pub notification_due_at: DateTime<Utc>,
    pub notification_sent: bool,
    pub reconnected: bool,
}

impl AgentOfflineBuffer {
    pub fn new(agent_id: i64, disconnected_at: DateTime<Utc>, grace: chrono::Duration) -> Self {
        AgentOfflineBuffer {
            agent_id,
            disconnected_at,
            notification_due_at: disconnected_at + grace,
            notification_sent: false,
            reconnected: false,
        }
    }

    pub fn mark_reconnected(&mut self, now: DateTime<Utc>) -> bool {
        if now < self.notification_due_at {
            self.reconnected = true;
            true
        } else {
            false
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.reconnected && !self.notification_sent && now >= self.notification_due_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_reconnect_inside_grace_suppresses_notification() {
        let t0 = Utc::now();
        let grace = chrono::Duration::seconds(60);
        let mut buf = AgentOfflineBuffer::new(1, t0, grace);
        let reconnected_at = t0 + chrono::Duration::seconds(30);
        assert!(buf.mark_reconnected(reconnected_at));
        assert!(!buf.is_due(t0 + grace));
    }

    #[test]
    fn s6_no_reconnect_fires_exactly_once() {
        let t0 = Utc::now();
        let grace = chrono::Duration::seconds(60);
        let buf = AgentOfflineBuffer::new(1, t0, grace);
        assert!(buf.is_due(t0 + grace));
    }
}
