pub mod envelope;

pub use envelope::{
    AckPayload, AgentConfigPayload, BenchmarkRequestPayload, BenchmarkResultPayload, ClientEnvelope,
    ClientMessage, CrackedHash, DeviceMetricsPayload, Envelope, FileSyncRequestPayload,
    FileSyncResponsePayload, HeartbeatPayload, KnownTask, ServerEnvelope, ServerMessage, StateSyncPayload,
    TaskAssignmentPayload, TaskProgressPayload, TaskStatusUpdatePayload,
};
