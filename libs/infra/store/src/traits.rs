//! The persistence boundary. Spec.md §3/§6.4 specify invariants, not a
//! schema: this trait is that boundary. A real deployment implements it
//! against Postgres/SQLite; this workspace ships the in-memory reference
//! implementation used by the scheduler and its tests.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use kh_models::{Agent, AgentOfflineBuffer, Hash, Hashlist, IncrementLayer, Job, JobTask, TaskStatus};

use crate::errors::StoreError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_agent(&self, id: i64) -> Result<Agent, StoreError>;
    async fn upsert_agent(&self, agent: Agent) -> Result<(), StoreError>;
    async fn list_idle_eligible_agents(&self) -> Result<Vec<Agent>, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError>;
    async fn upsert_job(&self, job: Job) -> Result<(), StoreError>;
    async fn list_schedulable_jobs(&self) -> Result<Vec<Job>, StoreError>;

    async fn list_layers(&self, job_id: Uuid) -> Result<Vec<IncrementLayer>, StoreError>;
    async fn upsert_layer(&self, layer: IncrementLayer) -> Result<(), StoreError>;

    async fn get_task(&self, id: Uuid) -> Result<JobTask, StoreError>;
    async fn insert_task(&self, task: JobTask) -> Result<(), StoreError>;
    async fn list_tasks_for_job(&self, job_id: Uuid) -> Result<Vec<JobTask>, StoreError>;
    async fn list_tasks_in_status(&self, statuses: &[TaskStatus]) -> Result<Vec<JobTask>, StoreError>;

    /// Agent-occupancy check per spec.md §5: "a task is in the active map
    /// iff its DB status is in {assigned, running}" — the uniqueness
    /// invariant an implementation enforces with a conditional update.
    async fn agent_active_task(&self, agent_id: i64) -> Result<Option<JobTask>, StoreError>;

    /// Compare-and-swap update of a single task's full record, rejecting
    /// the write unless the stored status still equals `expected_status`
    /// (spec.md §5: "row locks... conditional update on assignment").
    async fn transition_task(
        &self,
        task_id: Uuid,
        expected_status: TaskStatus,
        updated: JobTask,
    ) -> Result<(), StoreError>;

    async fn upsert_offline_buffer(&self, buffer: AgentOfflineBuffer) -> Result<(), StoreError>;
    async fn get_offline_buffer(&self, agent_id: i64) -> Result<Option<AgentOfflineBuffer>, StoreError>;
    async fn list_due_offline_buffers(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<AgentOfflineBuffer>, StoreError>;

    async fn get_hashlist(&self, id: i64) -> Result<Hashlist, StoreError>;
    async fn upsert_hashlist(&self, hashlist: Hashlist) -> Result<(), StoreError>;
    async fn upsert_hash(&self, hash: Hash) -> Result<(), StoreError>;
    async fn link_hash_to_hashlist(&self, hash_id: Uuid, hashlist_id: i64) -> Result<(), StoreError>;

    /// For every hash currently belonging to `hashlist_id`, the full set of
    /// hashlist ids it belongs to — the membership view orphan cleanup
    /// (spec.md §4.8) decides against.
    async fn hash_memberships(&self, hashlist_id: i64) -> Result<HashMap<Uuid, Vec<i64>>, StoreError>;

    /// Drop the `hashlist_hashes` rows for `hashlist_id` (the
    /// `clearing_references` phase).
    async fn unlink_hashlist(&self, hashlist_id: i64) -> Result<(), StoreError>;

    /// Delete hash rows outright (the `cleaning_orphans` phase, run in
    /// caller-chosen batches).
    async fn delete_hashes(&self, hash_ids: &[Uuid]) -> Result<(), StoreError>;

    /// Drop the hashlist row itself (the `finalizing` phase).
    async fn delete_hashlist(&self, hashlist_id: i64) -> Result<(), StoreError>;
}
