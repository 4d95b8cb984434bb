//! The controller<->agent wire envelope (spec.md §6.1): a JSON object
//! `{type, payload, request_id?}`, parsed once into a tagged sum type and
//! then handled exhaustively — never as an open map (spec.md §9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kh_models::DeviceInfo;

/// One entry of a progress update's optional cracked-hash batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrackedHash {
    pub hash_value: String,
    pub plaintext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub agent_id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metrics: Option<DeviceMetricsPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMetricsPayload {
    pub agent_id: i64,
    pub devices: Vec<DeviceInfo>,
    pub load_average: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignmentPayload {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub hashlist_id: i64,
    pub attack_mode: u8,
    pub hash_type: i32,
    pub binary_id: i64,
    pub binary_version_pattern: String,
    pub wordlist_paths: Vec<String>,
    pub rule_paths: Vec<String>,
    #[serde(default)]
    pub rule_chunk_path: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    pub keyspace_start: u64,
    pub keyspace_end: u64,
    pub effective_keyspace_start: u64,
    pub effective_keyspace_end: u64,
    #[serde(default)]
    pub rule_start_index: Option<u64>,
    #[serde(default)]
    pub rule_end_index: Option<u64>,
    pub extra_args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgressPayload {
    pub task_id: Uuid,
    pub status: String,
    pub keyspace_processed: u64,
    pub effective_progress: u64,
    pub progress_percent: f64,
    pub hash_rate: f64,
    pub device_metrics: Vec<DeviceInfo>,
    #[serde(default)]
    pub cracked_hashes: Vec<CrackedHash>,
    #[serde(default)]
    pub time_remaining_seconds: Option<u64>,
    #[serde(default)]
    pub first_update_marker: bool,
    #[serde(default)]
    pub total_effective_keyspace: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusUpdatePayload {
    pub task_id: Uuid,
    pub status: String,
    pub final_processed: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    pub crack_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRequestPayload {
    pub hash_type: i32,
    pub attack_mode: u8,
    pub sample: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResultPayload {
    pub hash_type: i32,
    pub attack_mode: u8,
    pub total_speed: f64,
    pub per_device: Vec<f64>,
    #[serde(default)]
    pub effective_keyspace: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSyncRequestPayload {
    pub file_kind: String,
    pub file_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSyncResponsePayload {
    pub file_kind: String,
    pub file_id: i64,
    pub md5: String,
    pub line_count: Option<u64>,
    pub download_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSyncPayload {
    pub known_tasks: Vec<KnownTask>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownTask {
    pub task_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfigPayload {
    pub heartbeat_interval_seconds: u32,
    pub extra_hashcat_params: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(default)]
    pub task_id: Option<Uuid>,
}

/// Messages sent agent -> controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat(HeartbeatPayload),
    DeviceMetrics(DeviceMetricsPayload),
    TaskProgress(TaskProgressPayload),
    TaskStatusUpdate(TaskStatusUpdatePayload),
    BenchmarkResult(BenchmarkResultPayload),
    FileSyncRequest(FileSyncRequestPayload),
    StateSync(StateSyncPayload),
    Ack(AckPayload),
}

/// Messages sent controller -> agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    TaskAssignment(TaskAssignmentPayload),
    BenchmarkRequest(BenchmarkRequestPayload),
    FileSyncResponse(FileSyncResponsePayload),
    AgentConfig(AgentConfigPayload),
    Stop { task_id: Uuid },
    Ack(AckPayload),
}

/// The envelope carried over the socket for either direction. `request_id`
/// lets a sender correlate an `ack` (or any response) back to its request;
/// it is not required for fire-and-forget messages like `heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<M> {
    #[serde(flatten)]
    pub message: M,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        Envelope { message, request_id: None }
    }

    pub fn with_request_id(message: M, request_id: Uuid) -> Self {
        Envelope { message, request_id: Some(request_id) }
    }
}

pub type ClientEnvelope = Envelope<ClientMessage>;
pub type ServerEnvelope = Envelope<ServerMessage>;
