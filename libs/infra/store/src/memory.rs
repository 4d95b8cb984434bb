//! In-memory reference `Store`. Grounded on
//! `apps/orchestrator/src/state/mission_control.rs`'s
//! `Mutex<VecDeque<WorkOrder>>` and the sibling `RwLock<HashMap<...>>`
//! telemetry maps: one `RwLock<HashMap<_, _>>` per aggregate, plus a dense
//! `agent_id -> task_id` index so the dispatcher's per-tick scan doesn't
//! walk every task (spec.md §9, arena/indices guidance).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use kh_models::{Agent, AgentOfflineBuffer, AgentStatus, Hash, Hashlist, IncrementLayer, Job, JobStatus, JobTask, TaskStatus};

use crate::errors::StoreError;
use crate::traits::Store;

#[derive(Default)]
pub struct InMemoryStore {
    agents: RwLock<HashMap<i64, Agent>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    layers: RwLock<HashMap<Uuid, IncrementLayer>>,
    tasks: RwLock<HashMap<Uuid, JobTask>>,
    /// Invariant: `agent_active_task[a] == Some(t)` iff `tasks[t].status`
    /// is in {assigned, running} and `tasks[t].agent_id == Some(a)`.
    agent_active_task: RwLock<HashMap<i64, Uuid>>,
    offline_buffers: RwLock<HashMap<i64, AgentOfflineBuffer>>,
    hashlists: RwLock<HashMap<i64, Hashlist>>,
    hashes: RwLock<HashMap<Uuid, Hash>>,
    /// `hashlist_hashes` join table, keyed by hashlist id.
    hashlist_hashes: RwLock<HashMap<i64, HashSet<Uuid>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn reindex_agent_occupancy(&self, task: &JobTask) {
        let mut idx = self.agent_active_task.write().expect("lock poisoned");
        if let Some(agent_id) = task.agent_id {
            if task.status.occupies_agent() {
                idx.insert(agent_id, task.id);
            } else if idx.get(&agent_id) == Some(&task.id) {
                idx.remove(&agent_id);
            }
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_agent(&self, id: i64) -> Result<Agent, StoreError> {
        self.agents
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "agent", id: id.to_string() })
    }

    async fn upsert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        self.agents.write().expect("lock poisoned").insert(agent.id, agent);
        Ok(())
    }

    async fn list_idle_eligible_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let agents = self.agents.read().expect("lock poisoned");
        let occupied = self.agent_active_task.read().expect("lock poisoned");
        Ok(agents
            .values()
            .filter(|a| a.status == AgentStatus::Active)
            .filter(|a| !occupied.contains_key(&a.id))
            .cloned()
            .collect())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "job", id: id.to_string() })
    }

    async fn upsert_job(&self, job: Job) -> Result<(), StoreError> {
        self.jobs.write().expect("lock poisoned").insert(job.id, job);
        Ok(())
    }

    async fn list_schedulable_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().expect("lock poisoned");
        let mut out: Vec<Job> = jobs.values().filter(|j| j.status.is_schedulable()).cloned().collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(out)
    }

    async fn list_layers(&self, job_id: Uuid) -> Result<Vec<IncrementLayer>, StoreError> {
        let layers = self.layers.read().expect("lock poisoned");
        Ok(layers.values().filter(|l| l.job_id == job_id).cloned().collect())
    }

    async fn upsert_layer(&self, layer: IncrementLayer) -> Result<(), StoreError> {
        self.layers.write().expect("lock poisoned").insert(layer.id, layer);
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<JobTask, StoreError> {
        self.tasks
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "task", id: id.to_string() })
    }

    async fn insert_task(&self, task: JobTask) -> Result<(), StoreError> {
        {
            let tasks = self.tasks.read().expect("lock poisoned");
            if tasks.contains_key(&task.id) {
                return Err(StoreError::Conflict(format!("task {} already exists", task.id)));
            }
        }
        self.reindex_agent_occupancy(&task);
        self.tasks.write().expect("lock poisoned").insert(task.id, task);
        Ok(())
    }

    async fn list_tasks_for_job(&self, job_id: Uuid) -> Result<Vec<JobTask>, StoreError> {
        let tasks = self.tasks.read().expect("lock poisoned");
        Ok(tasks.values().filter(|t| t.job_id == job_id).cloned().collect())
    }

    async fn list_tasks_in_status(&self, statuses: &[TaskStatus]) -> Result<Vec<JobTask>, StoreError> {
        let tasks = self.tasks.read().expect("lock poisoned");
        Ok(tasks.values().filter(|t| statuses.contains(&t.status)).cloned().collect())
    }

    async fn agent_active_task(&self, agent_id: i64) -> Result<Option<JobTask>, StoreError> {
        let idx = self.agent_active_task.read().expect("lock poisoned");
        match idx.get(&agent_id) {
            Some(task_id) => Ok(self.tasks.read().expect("lock poisoned").get(task_id).cloned()),
            None => Ok(None),
        }
    }

    async fn transition_task(
        &self,
        task_id: Uuid,
        expected_status: TaskStatus,
        updated: JobTask,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().expect("lock poisoned");
        let current = tasks
            .get(&task_id)
            .ok_or(StoreError::NotFound { kind: "task", id: task_id.to_string() })?;
        if current.status != expected_status {
            return Err(StoreError::CasMismatch {
                entity: "task",
                id: task_id.to_string(),
                expected: format!("{expected_status:?}"),
                actual: format!("{:?}", current.status),
            });
        }
        drop(tasks);
        self.reindex_agent_occupancy(&updated);
        self.tasks.write().expect("lock poisoned").insert(task_id, updated);
        Ok(())
    }

    async fn upsert_offline_buffer(&self, buffer: AgentOfflineBuffer) -> Result<(), StoreError> {
        self.offline_buffers.write().expect("lock poisoned").insert(buffer.agent_id, buffer);
        Ok(())
    }

    async fn get_offline_buffer(&self, agent_id: i64) -> Result<Option<AgentOfflineBuffer>, StoreError> {
        Ok(self.offline_buffers.read().expect("lock poisoned").get(&agent_id).cloned())
    }

    async fn list_due_offline_buffers(&self, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<AgentOfflineBuffer>, StoreError> {
        let buffers = self.offline_buffers.read().expect("lock poisoned");
        Ok(buffers.values().filter(|b| b.is_due(now)).cloned().collect())
    }

    async fn get_hashlist(&self, id: i64) -> Result<Hashlist, StoreError> {
        self.hashlists
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "hashlist", id: id.to_string() })
    }

    async fn upsert_hashlist(&self, hashlist: Hashlist) -> Result<(), StoreError> {
        self.hashlists.write().expect("lock poisoned").insert(hashlist.id, hashlist);
        Ok(())
    }

    async fn upsert_hash(&self, hash: Hash) -> Result<(), StoreError> {
        self.hashes.write().expect("lock poisoned").insert(hash.id, hash);
        Ok(())
    }

    async fn link_hash_to_hashlist(&self, hash_id: Uuid, hashlist_id: i64) -> Result<(), StoreError> {
        self.hashlist_hashes.write().expect("lock poisoned").entry(hashlist_id).or_default().insert(hash_id);
        Ok(())
    }

    async fn hash_memberships(&self, hashlist_id: i64) -> Result<HashMap<Uuid, Vec<i64>>, StoreError> {
        let links = self.hashlist_hashes.read().expect("lock poisoned");
        let members = match links.get(&hashlist_id) {
            Some(members) => members,
            None => return Ok(HashMap::new()),
        };
        let mut out = HashMap::new();
        for &hash_id in members {
            let hashlists: Vec<i64> = links.iter().filter(|(_, hashes)| hashes.contains(&hash_id)).map(|(id, _)| *id).collect();
            out.insert(hash_id, hashlists);
        }
        Ok(out)
    }

    async fn unlink_hashlist(&self, hashlist_id: i64) -> Result<(), StoreError> {
        self.hashlist_hashes.write().expect("lock poisoned").remove(&hashlist_id);
        Ok(())
    }

    async fn delete_hashes(&self, hash_ids: &[Uuid]) -> Result<(), StoreError> {
        let mut hashes = self.hashes.write().expect("lock poisoned");
        let mut links = self.hashlist_hashes.write().expect("lock poisoned");
        for hash_id in hash_ids {
            hashes.remove(hash_id);
            for members in links.values_mut() {
                members.remove(hash_id);
            }
        }
        Ok(())
    }

    async fn delete_hashlist(&self, hashlist_id: i64) -> Result<(), StoreError> {
        self.hashlists.write().expect("lock poisoned").remove(&hashlist_id);
        self.hashlist_hashes.write().expect("lock poisoned").remove(&hashlist_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kh_models::{AttackConfig, DetailedStatus, HashlistStatus};
    use kh_core_math::keyspace::AttackMode;
    use kh_core_math::version::VersionPattern;

    fn sample_hashlist(id: i64) -> Hashlist {
        Hashlist {
            id,
            user_id: 1,
            client_id: None,
            hash_type_id: 1000,
            total_hashes: 1,
            cracked_hashes: 0,
            status: HashlistStatus::Ready,
            exclude_from_potfile: false,
            original_file_path: None,
            has_mixed_work_factors: false,
            linked_hashlist: None,
        }
    }

    fn sample_hash(id: Uuid) -> Hash {
        Hash {
            id,
            hash_value: "deadbeef".into(),
            original_hash: "deadbeef".into(),
            hash_type_id: 1000,
            is_cracked: false,
            password: None,
            username: None,
            domain: None,
            last_updated: Utc::now(),
            lm_state: None,
            linked_hash: None,
        }
    }

    fn sample_task(job_id: Uuid, agent_id: Option<i64>, status: TaskStatus) -> JobTask {
        JobTask {
            id: Uuid::new_v4(),
            chunk_number: 1,
            job_id,
            agent_id,
            increment_layer_id: None,
            keyspace_start: 0,
            keyspace_end: 100,
            keyspace_processed: 0,
            effective_keyspace_start: 0,
            effective_keyspace_end: 100,
            effective_keyspace_processed: 0,
            benchmark_speed: Some(100.0),
            chunk_duration: 900,
            priority: 0,
            attack_cmd: String::new(),
            rule_start_index: None,
            rule_end_index: None,
            rule_chunk_path: None,
            is_rule_split_task: false,
            status,
            detailed_status: DetailedStatus::Pending,
            retry_count: 0,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            last_checkpoint: None,
            error_message: None,
            crack_count: 0,
            progress_percent: 0.0,
        }
    }

    fn sample_agent(id: i64, status: AgentStatus) -> Agent {
        Agent {
            id,
            name: format!("agent-{id}"),
            api_key_hash: "h".into(),
            status,
            last_heartbeat: Some(Utc::now()),
            last_seen_ip: None,
            devices: vec![],
            enabled_devices: vec![],
            agent_binary_pattern: VersionPattern::Default,
            extra_hashcat_params: String::new(),
        }
    }

    fn sample_job(id: Uuid, priority: i32) -> Job {
        Job {
            id,
            name: "job".into(),
            hashlist_id: 1,
            priority,
            attack: AttackConfig {
                attack_mode: AttackMode::Wordlist,
                wordlist_ids: vec![1],
                rule_ids: vec![],
                mask: None,
                increment_min: None,
                increment_max: None,
            },
            preset_job_id: None,
            binary_version_pattern: VersionPattern::Default,
            chunk_size_seconds: 900,
            allow_high_priority_override: false,
            overall_status_label: String::new(),
            created_by: 1,
            total_keyspace: 100,
            processed_keyspace: 0,
            effective_keyspace: 100,
            dispatched_keyspace: 0,
            is_accurate_keyspace: true,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn property2_occupied_agent_is_excluded_from_idle_list() {
        let store = InMemoryStore::new();
        store.upsert_agent(sample_agent(1, AgentStatus::Active)).await.unwrap();
        let job_id = Uuid::new_v4();
        store.upsert_job(sample_job(job_id, 0)).await.unwrap();
        store.insert_task(sample_task(job_id, Some(1), TaskStatus::Assigned)).await.unwrap();

        let idle = store.list_idle_eligible_agents().await.unwrap();
        assert!(idle.is_empty());
        assert!(store.agent_active_task(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cas_rejects_stale_expected_status() {
        let store = InMemoryStore::new();
        let job_id = Uuid::new_v4();
        let task = sample_task(job_id, Some(1), TaskStatus::Assigned);
        let id = task.id;
        store.insert_task(task.clone()).await.unwrap();

        let mut updated = task.clone();
        updated.status = TaskStatus::Running;
        let result = store.transition_task(id, TaskStatus::Running, updated).await;
        assert!(matches!(result, Err(StoreError::CasMismatch { .. })));
    }

    #[tokio::test]
    async fn schedulable_jobs_ordered_by_priority_then_age() {
        let store = InMemoryStore::new();
        let low = sample_job(Uuid::new_v4(), 0);
        let high = sample_job(Uuid::new_v4(), 10);
        store.upsert_job(low.clone()).await.unwrap();
        store.upsert_job(high.clone()).await.unwrap();

        let ordered = store.list_schedulable_jobs().await.unwrap();
        assert_eq!(ordered[0].id, high.id);
    }

    #[tokio::test]
    async fn orphan_cleanup_wiring_reaps_only_unshared_hashes() {
        let store = InMemoryStore::new();
        store.upsert_hashlist(sample_hashlist(1)).await.unwrap();
        store.upsert_hashlist(sample_hashlist(2)).await.unwrap();

        let orphan = Uuid::new_v4();
        let shared = Uuid::new_v4();
        store.upsert_hash(sample_hash(orphan)).await.unwrap();
        store.upsert_hash(sample_hash(shared)).await.unwrap();
        store.link_hash_to_hashlist(orphan, 1).await.unwrap();
        store.link_hash_to_hashlist(shared, 1).await.unwrap();
        store.link_hash_to_hashlist(shared, 2).await.unwrap();

        let membership = store.hash_memberships(1).await.unwrap();
        assert_eq!(membership.get(&orphan), Some(&vec![1]));
        assert!(membership.get(&shared).unwrap().contains(&2));

        store.unlink_hashlist(1).await.unwrap();
        store.delete_hashes(&[orphan]).await.unwrap();
        store.delete_hashlist(1).await.unwrap();

        assert!(store.hash_memberships(1).await.unwrap().is_empty());
        assert!(!store.hashes.read().expect("lock poisoned").contains_key(&orphan));
        assert!(store.hashes.read().expect("lock poisoned").contains_key(&shared));
        assert!(!store.hashlists.read().expect("lock poisoned").contains_key(&1));
    }
}
