//! Agent identity, fleet state and capability (spec.md §3 "Agent").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kh_core_math::version::VersionPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

/// One GPU/CPU device reported by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub temperature_celsius: Option<f32>,
    #[serde(default)]
    pub utilization_percent: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    /// Stored hashed; never the raw key.
    pub api_key_hash: String,
    pub status: AgentStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_seen_ip: Option<String>,
    pub devices: Vec<DeviceInfo>,
    pub enabled_devices: Vec<u32>,
    pub agent_binary_pattern: VersionPattern,
    pub extra_hashcat_params: String,
}

impl Agent {
    pub fn is_heartbeat_fresh(&self, now: DateTime<Utc>, interval: chrono::Duration, missed_streak: i32) -> bool {
        match self.last_heartbeat {
            Some(last) => now - last <= interval * missed_streak,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(last_heartbeat: Option<DateTime<Utc>>) -> Agent {
        Agent {
            id: 1,
            name: "rig-1".into(),
            api_key_hash: "hash".into(),
            status: AgentStatus::Active,
            last_heartbeat,
            last_seen_ip: None,
            devices: vec![],
            enabled_devices: vec![],
            agent_binary_pattern: VersionPattern::Default,
            extra_hashcat_params: String::new(),
        }
    }

    #[test]
    fn missing_heartbeat_is_not_fresh() {
        let a = agent(None);
        assert!(!a.is_heartbeat_fresh(Utc::now(), chrono::Duration::seconds(5), 3));
    }

    #[test]
    fn recent_heartbeat_is_fresh() {
        let now = Utc::now();
        let a = agent(Some(now - chrono::Duration::seconds(2)));
        assert!(a.is_heartbeat_fresh(now, chrono::Duration::seconds(5), 3));
    }
}
