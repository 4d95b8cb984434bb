//! The dispatcher's owning background task. Grounded on
//! `apps/orchestrator/src/services/reaper.rs`'s `spawn_reaper` shape
//! (interval tick, tracing on state changes, continues past transient
//! errors) applied to `kh_scheduler::dispatcher::dispatch_tick`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use kh_core_math::keyspace::count_lines;
use kh_core_math::version::ActiveBinary;
use kh_models::{Job, TaskStatus};
use kh_scheduler::chunking::ChunkingConfig;
use kh_scheduler::dispatcher::{dispatch_tick, AgentSlot, JobContext};

use crate::event_bus::RealTimeEvent;
use crate::state::AppState;

/// Spawn the dispatcher loop. Runs until the process exits; errors from
/// one tick are logged and do not stop the loop (spec.md §7: "control
/// loops log and continue on transient errors").
pub fn spawn_dispatch_loop(state: AppState, active_binaries: Vec<ActiveBinary>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(state.config.dispatch_tick_seconds as u64));
        loop {
            ticker.tick().await;
            if !state.is_operational().await {
                continue;
            }
            if let Err(err) = run_tick(&state, &active_binaries).await {
                tracing::warn!(%err, "dispatch tick failed");
            }
        }
    })
}

/// Path-addressed layout for the wordlist/rule content the keyspace
/// calculator reads (spec.md §6.2 "data directory"): `{data_dir}/wordlists/{id}.txt`,
/// `{data_dir}/rules/{id}.rule`.
fn wordlist_file_path(data_dir: &Path, wordlist_id: i64) -> PathBuf {
    data_dir.join("wordlists").join(format!("{wordlist_id}.txt"))
}

fn rule_file_path(data_dir: &Path, rule_id: i64) -> PathBuf {
    data_dir.join("rules").join(format!("{rule_id}.rule"))
}

/// Sum of rule *line* counts across every rule file attached to the job
/// (spec.md §4.2: effective keyspace is scaled by total rule lines, not
/// rule file count; spec.md §8 scenario S2 uses a 50,000-line rule file).
fn total_rule_line_count(data_dir: &Path, rule_ids: &[i64]) -> Result<u64, kh_core_math::MathError> {
    let mut total = 0u64;
    for &rule_id in rule_ids {
        total += count_lines(rule_file_path(data_dir, rule_id))?;
    }
    Ok(total)
}

/// Per-job dispatch context assembled from the store ahead of the match
/// loop: the schedulable layer (if incremented), its global coordinate
/// offset, and the real rule-line total driving rule-split math.
struct JobPrep {
    job_id: Uuid,
    layer: Option<kh_models::IncrementLayer>,
    global_offset: u64,
    total_rule_count: u64,
}

/// Add (or, on rollback, subtract) `delta` effective-keyspace units from
/// the job's (or its scheduled layer's) `dispatched_keyspace` — the
/// counter the chunking engine reads `scope.dispatched_keyspace` from on
/// the *next* tick (spec.md §4.3). Must run in the same step as
/// `insert_task`/rollback or the next tick re-emits the same chunk.
async fn adjust_dispatched_keyspace(
    state: &AppState,
    job_id: Uuid,
    layer_id: Option<Uuid>,
    delta: u64,
    subtract: bool,
) -> Result<(), crate::error::ControllerError> {
    let apply = |current: u64| if subtract { current.saturating_sub(delta) } else { current.saturating_add(delta) };

    if let Some(layer_id) = layer_id {
        let layers = state.store.list_layers(job_id).await?;
        if let Some(mut layer) = layers.into_iter().find(|l| l.id == layer_id) {
            layer.dispatched_keyspace = apply(layer.dispatched_keyspace);
            state.store.upsert_layer(layer).await?;
        }
    } else {
        let mut job = state.store.get_job(job_id).await?;
        job.dispatched_keyspace = apply(job.dispatched_keyspace);
        state.store.upsert_job(job).await?;
    }
    Ok(())
}

async fn run_tick(state: &AppState, active_binaries: &[ActiveBinary]) -> Result<(), crate::error::ControllerError> {
    let agents = state.store.list_idle_eligible_agents().await?;
    let jobs = state.store.list_schedulable_jobs().await?;
    if agents.is_empty() || jobs.is_empty() {
        return Ok(());
    }

    let mut slots: Vec<AgentSlot> = agents.iter().map(AgentSlot::from).collect();

    let config = ChunkingConfig { chunk_duration_seconds: state.config.chunk_duration_seconds };
    let mut all_tasks = Vec::new();
    for job in &jobs {
        all_tasks.extend(state.store.list_tasks_for_job(job.id).await?);
    }

    let mut preps: Vec<JobPrep> = Vec::new();
    for job in &jobs {
        let layers = state.store.list_layers(job.id).await?;
        let layer = kh_models::job::next_schedulable_layer(&layers).cloned();
        let global_offset = kh_models::job::global_offset(&layers, layer.as_ref());

        let total_rule_count = match total_rule_line_count(&state.config.data_dir, &job.attack.rule_ids) {
            Ok(total) => total,
            Err(err) => {
                tracing::warn!(job_id = %job.id, %err, "skipping job this tick: rule line count unavailable");
                continue;
            }
        };

        preps.push(JobPrep { job_id: job.id, layer, global_offset, total_rule_count });
    }

    let job_by_id: HashMap<Uuid, &Job> = jobs.iter().map(|j| (j.id, j)).collect();

    let mut contexts = Vec::new();
    for prep in &preps {
        let job = job_by_id[&prep.job_id];
        let benchmark_speeds: HashMap<i64, f64> = agents
            .iter()
            .filter_map(|a| a.last_heartbeat.map(|_| (a.id, 5_000.0)))
            .collect();
        contexts.push(JobContext {
            job,
            layer: prep.layer.as_ref(),
            global_offset: prep.global_offset,
            base_keyspace: job.total_keyspace,
            total_rule_count: prep.total_rule_count,
            benchmark_speeds,
        });
    }

    let decisions = dispatch_tick(&mut slots, &contexts, &all_tasks, active_binaries, config)?;

    for decision in decisions {
        let job = job_by_id[&decision.job_id];
        // Resolved up front: a lookup failure here must not insert a task
        // that is then never actually sent.
        let hashlist = match state.store.get_hashlist(job.hashlist_id).await {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!(job_id = %decision.job_id, %err, "skipping task assignment: hashlist lookup failed");
                continue;
            }
        };

        let mut task = decision.task;
        task.status = TaskStatus::Assigned;
        task.agent_id = Some(decision.agent_id);
        task.assigned_at = Some(chrono::Utc::now());
        let task_id = task.id;
        let layer_id = task.increment_layer_id;
        let delta = task.effective_keyspace_end - task.effective_keyspace_start;

        if state.store.insert_task(task.clone()).await.is_err() {
            continue;
        }

        if let Err(err) = adjust_dispatched_keyspace(state, decision.job_id, layer_id, delta, false).await {
            tracing::warn!(job_id = %decision.job_id, %err, "failed to advance dispatched_keyspace");
        }

        let assignment = kh_protocol::ServerMessage::TaskAssignment(kh_protocol::TaskAssignmentPayload {
            task_id,
            job_id: decision.job_id,
            hashlist_id: job.hashlist_id,
            attack_mode: job.attack.attack_mode as u8,
            hash_type: hashlist.hash_type_id,
            binary_id: decision.binary_id,
            binary_version_pattern: job.binary_version_pattern.to_string(),
            wordlist_paths: job
                .attack
                .wordlist_ids
                .iter()
                .map(|&id| wordlist_file_path(&state.config.data_dir, id).display().to_string())
                .collect(),
            rule_paths: job
                .attack
                .rule_ids
                .iter()
                .map(|&id| rule_file_path(&state.config.data_dir, id).display().to_string())
                .collect(),
            rule_chunk_path: task.rule_chunk_path.clone(),
            mask: job.attack.mask.clone(),
            keyspace_start: task.keyspace_start,
            keyspace_end: task.keyspace_end,
            effective_keyspace_start: task.effective_keyspace_start,
            effective_keyspace_end: task.effective_keyspace_end,
            rule_start_index: task.rule_start_index,
            rule_end_index: task.rule_end_index,
            extra_args: task.attack_cmd.clone(),
        });

        // Roll back to `pending` with no agent on delivery failure
        // (spec.md §4.4 step 3), including the dispatched_keyspace bump
        // above so a lost assignment doesn't leak keyspace as dispatched.
        if state.send_to_agent(decision.agent_id, assignment).await.is_err() {
            let mut rolled_back = task;
            rolled_back.status = TaskStatus::Pending;
            rolled_back.agent_id = None;
            rolled_back.assigned_at = None;
            let _ = state
                .store
                .transition_task(task_id, TaskStatus::Assigned, rolled_back)
                .await;
            if let Err(err) = adjust_dispatched_keyspace(state, decision.job_id, layer_id, delta, true).await {
                tracing::warn!(job_id = %decision.job_id, %err, "failed to roll back dispatched_keyspace");
            }
            continue;
        }

        state.event_bus.emit(RealTimeEvent::TaskAssigned { task_id, agent_id: decision.agent_id });
    }

    Ok(())
}
