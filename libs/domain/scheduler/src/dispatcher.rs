//! Dispatcher (C5): the single continuously-running match loop between
//! idle eligible agents and schedulable work (spec.md §4.4).
//!
//! Grounded on `apps/orchestrator/src/state/mission_control.rs`'s
//! queue-pull-with-rollback pattern, and on the dispatch-loop shape of
//! a worker-pool scheduler (see `other_examples/` ballista-scheduler
//! cluster module): collect idle workers, collect pending work, match in
//! priority order, roll back on delivery failure.

use std::collections::HashMap;

use kh_core_math::version::{resolve, ActiveBinary, VersionPattern};
use kh_models::{Agent, IncrementLayer, Job, JobTask};

use crate::chunking::{next_chunk, ChunkOutcome, ChunkingConfig};
use crate::errors::SchedulerError;

/// A dense, per-tick slot for an idle agent — spec.md §9's "dense-index
/// instead of UUID pointer graphs" guidance applied to the dispatcher's
/// scan, which only needs `id` and a mutable busy flag for this tick.
#[derive(Debug, Clone)]
pub struct AgentSlot {
    pub agent_id: i64,
    pub busy_this_tick: bool,
    pub binary_pattern: VersionPattern,
}

impl From<&Agent> for AgentSlot {
    fn from(a: &Agent) -> Self {
        AgentSlot {
            agent_id: a.id,
            busy_this_tick: false,
            binary_pattern: a.agent_binary_pattern.clone(),
        }
    }
}

/// Per-job context the dispatcher needs beyond the bare `Job` record:
/// its current schedulable layer (if incremented) and the attack-shape
/// numbers the chunking engine needs. Assembled by the caller (typically
/// `kh-controller`'s dispatch loop) from the store and `kh-core-math`.
pub struct JobContext<'a> {
    pub job: &'a Job,
    pub layer: Option<&'a IncrementLayer>,
    pub global_offset: u64,
    pub base_keyspace: u64,
    pub total_rule_count: u64,
    /// Agent benchmark speed lookup for this job's (attack_mode, hash_type);
    /// `None` if the caller has no cached benchmark for a given agent.
    pub benchmark_speeds: HashMap<i64, f64>,
}

#[derive(Debug)]
pub struct DispatchDecision {
    pub agent_id: i64,
    pub job_id: uuid::Uuid,
    /// The binary the Version Resolver (C1) picked for this (agent, job)
    /// pair — the caller uses it to fill in the `task_assignment`'s
    /// `binary_id` (spec.md §6.1).
    pub binary_id: i64,
    pub task: JobTask,
}

/// One pass of the dispatcher's matching loop (spec.md §4.4 steps 1-5).
/// `active_binaries` resolves version compatibility; `existing_tasks`
/// must include every non-cancelled task of every job under
/// consideration, used for chunk numbering and rule-split bookkeeping.
///
/// Jobs are already expected to be pre-sorted by (priority desc,
/// created_at asc) by the caller (the store does this — see
/// `kh_store::Store::list_schedulable_jobs`), which also gives fairness
/// within equal priority via stable sort on `created_at`.
#[tracing::instrument(skip_all, fields(n_agents = agents.len(), n_jobs = jobs.len()))]
pub fn dispatch_tick(
    agents: &mut [AgentSlot],
    jobs: &[JobContext<'_>],
    existing_tasks: &[JobTask],
    active_binaries: &[ActiveBinary],
    config: ChunkingConfig,
) -> Result<Vec<DispatchDecision>, SchedulerError> {
    let mut decisions = Vec::new();

    for job_ctx in jobs {
        // Priority inversion: a high-priority job with
        // `allow_high_priority_override` set drains the field but does not
        // preempt already-running tasks of lower-priority jobs — see
        // DESIGN.md open-question decision #1. Since lower-priority jobs
        // simply sort later in `jobs`, agents already claimed this tick by
        // the high-priority job are skipped naturally below; no explicit
        // cancellation of other jobs' tasks happens here.
        for slot in agents.iter_mut() {
            if slot.busy_this_tick {
                continue;
            }

            let job_pattern = &job_ctx.job.binary_version_pattern;
            let binary_id = match resolve(&slot.binary_pattern, job_pattern, active_binaries) {
                Ok(id) => id,
                Err(_) => continue, // incompatible: try the next agent
            };

            let benchmark = job_ctx.benchmark_speeds.get(&slot.agent_id).copied();
            let outcome = next_chunk(
                job_ctx.job,
                job_ctx.layer,
                job_ctx.global_offset,
                job_ctx.base_keyspace,
                job_ctx.total_rule_count,
                benchmark,
                existing_tasks,
                config,
            )?;

            match outcome {
                ChunkOutcome::Exhausted => break, // no more work in this job for anyone this tick
                ChunkOutcome::Chunk(task) | ChunkOutcome::BenchmarkNeeded(task) => {
                    slot.busy_this_tick = true;
                    decisions.push(DispatchDecision {
                        agent_id: slot.agent_id,
                        job_id: job_ctx.job.id,
                        binary_id,
                        task: *task,
                    });
                    break; // this agent is now busy; move to the next idle one
                }
            }
        }
    }

    Ok(decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kh_core_math::keyspace::AttackMode;
    use kh_models::{AttackConfig, JobStatus};
    use uuid::Uuid;

    fn job(priority: i32, effective_keyspace: u64) -> Job {
        Job {
            id: Uuid::new_v4(),
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
            total_keyspace: effective_keyspace,
            processed_keyspace: 0,
            effective_keyspace,
            dispatched_keyspace: 0,
            is_accurate_keyspace: true,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn binaries() -> Vec<ActiveBinary> {
        vec![kh_core_math::version::ActiveBinary {
            id: 1,
            version: kh_core_math::version::Version::parse("7.1.2").unwrap(),
            is_default: true,
            is_active: true,
        }]
    }

    #[test]
    fn property2_one_task_per_agent_per_tick() {
        let j1 = job(0, 1_000_000);
        let j2 = job(0, 1_000_000);
        let mut speeds = HashMap::new();
        speeds.insert(1, 2000.0);
        let ctx = vec![
            JobContext { job: &j1, layer: None, global_offset: 0, base_keyspace: 1_000_000, total_rule_count: 0, benchmark_speeds: speeds.clone() },
            JobContext { job: &j2, layer: None, global_offset: 0, base_keyspace: 1_000_000, total_rule_count: 0, benchmark_speeds: speeds },
        ];
        let mut agents = vec![AgentSlot { agent_id: 1, busy_this_tick: false, binary_pattern: VersionPattern::Default }];
        let decisions = dispatch_tick(&mut agents, &ctx, &[], &binaries(), ChunkingConfig::default()).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].job_id, j1.id);
    }

    #[test]
    fn higher_priority_job_served_first() {
        let low = job(0, 1_000_000);
        let high = job(10, 1_000_000);
        let mut speeds = HashMap::new();
        speeds.insert(1, 2000.0);
        // caller is expected to pre-sort by priority desc; mimic that here.
        let ctx = vec![
            JobContext { job: &high, layer: None, global_offset: 0, base_keyspace: 1_000_000, total_rule_count: 0, benchmark_speeds: speeds.clone() },
            JobContext { job: &low, layer: None, global_offset: 0, base_keyspace: 1_000_000, total_rule_count: 0, benchmark_speeds: speeds },
        ];
        let mut agents = vec![AgentSlot { agent_id: 1, busy_this_tick: false, binary_pattern: VersionPattern::Default }];
        let decisions = dispatch_tick(&mut agents, &ctx, &[], &binaries(), ChunkingConfig::default()).unwrap();
        assert_eq!(decisions[0].job_id, high.id);
    }

    #[test]
    fn incompatible_agent_is_skipped() {
        let j = job(0, 1_000_000);
        let mut speeds = HashMap::new();
        speeds.insert(1, 2000.0);
        let ctx = vec![JobContext {
            job: &j,
            layer: None,
            global_offset: 0,
            base_keyspace: 1_000_000,
            total_rule_count: 0,
            benchmark_speeds: speeds,
        }];
        let mut agents = vec![AgentSlot { agent_id: 1, busy_this_tick: false, binary_pattern: VersionPattern::Major(6) }];
        let decisions = dispatch_tick(&mut agents, &ctx, &[], &binaries(), ChunkingConfig::default()).unwrap();
        assert!(decisions.is_empty());
    }
}
