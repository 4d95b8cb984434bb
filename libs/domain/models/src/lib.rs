//! Domain entities shared between the controller and the agent. The
//! controller exclusively owns all of these; agents hold transient local
//! state that mirrors a subset (see `kh-agent`).

pub mod agent;
pub mod hashlist;
pub mod job;
pub mod offline_buffer;
pub mod orphan_cleanup;
pub mod task;

pub use agent::{Agent, AgentStatus, DeviceInfo};
pub use hashlist::{Hash, Hashlist, HashlistStatus, LinkType, LmCrackState};
pub use job::{AttackConfig, IncrementLayer, Job, JobStatus, LayerStatus};
pub use offline_buffer::AgentOfflineBuffer;
pub use orphan_cleanup::{batches as orphan_batches, find_orphaned_hashes, OrphanCleanupPhase};
pub use task::{DetailedStatus, JobTask, TaskStatus};
