//! Chunking Engine (C4) — the core of the core. Produces the next task
//! for a `(job, agent)` pair per spec.md §4.3.

use chrono::Utc;
use uuid::Uuid;

use kh_models::{DetailedStatus, IncrementLayer, Job, JobTask, TaskStatus};

use crate::errors::SchedulerError;

/// Configuration knobs called out as implementer-decided in spec.md §9.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Target wall-clock duration of a single chunk, in seconds.
    pub chunk_duration_seconds: u32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig { chunk_duration_seconds: 900 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// A normal (or rule-split) unit of work to assign.
    Chunk(Box<JobTask>),
    /// The agent has no fresh benchmark for this (attack_mode, hash_type);
    /// emit a zero-range benchmark task instead (spec.md §4.3).
    BenchmarkNeeded(Box<JobTask>),
    /// Nothing left to dispatch for this job/layer right now.
    Exhausted,
}

/// Current (layer-scoped, or job-scoped for non-incremented attacks)
/// keyspace counters the chunking engine reads and clamps against.
struct Scope {
    dispatched_keyspace: u64,
    effective_keyspace: u64,
    global_offset: u64,
    layer_id: Option<Uuid>,
}

fn current_scope(job: &Job, layer: Option<&IncrementLayer>) -> Scope {
    match layer {
        Some(l) => Scope {
            dispatched_keyspace: l.dispatched_keyspace,
            effective_keyspace: l.effective_keyspace,
            global_offset: 0,
            layer_id: Some(l.id),
        },
        None => Scope {
            dispatched_keyspace: job.dispatched_keyspace,
            effective_keyspace: job.effective_keyspace,
            global_offset: 0,
            layer_id: None,
        },
    }
}

fn next_chunk_number(existing_tasks: &[JobTask]) -> u64 {
    existing_tasks.iter().map(|t| t.chunk_number).max().map(|n| n + 1).unwrap_or(1)
}

fn blank_task(job: &Job, layer_id: Option<Uuid>, chunk_number: u64) -> JobTask {
    JobTask {
        id: Uuid::new_v4(),
        chunk_number,
        job_id: job.id,
        agent_id: None,
        increment_layer_id: layer_id,
        keyspace_start: 0,
        keyspace_end: 0,
        keyspace_processed: 0,
        effective_keyspace_start: 0,
        effective_keyspace_end: 0,
        effective_keyspace_processed: 0,
        benchmark_speed: None,
        chunk_duration: 0,
        priority: job.priority,
        attack_cmd: String::new(),
        rule_start_index: None,
        rule_end_index: None,
        rule_chunk_path: None,
        is_rule_split_task: false,
        status: TaskStatus::Pending,
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

/// Produce the next task for `(job, agent)`. `base_keyspace` and
/// `total_rule_count` describe the attack's keyspace shape in *per-layer*
/// coordinates; `global_offset` is the sum of effective keyspace of all
/// prior (completed) layers, used to compute global coordinates for
/// incremented attacks (spec.md §4.3).
#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip(existing_tasks), fields(job_id = %job.id))]
pub fn next_chunk(
    job: &Job,
    layer: Option<&IncrementLayer>,
    global_offset: u64,
    base_keyspace: u64,
    total_rule_count: u64,
    benchmark_speed: Option<f64>,
    existing_tasks: &[JobTask],
    config: ChunkingConfig,
) -> Result<ChunkOutcome, SchedulerError> {
    let mut scope = current_scope(job, layer);
    scope.global_offset = global_offset;

    if scope.dispatched_keyspace >= scope.effective_keyspace {
        return Ok(ChunkOutcome::Exhausted);
    }

    let Some(speed) = benchmark_speed else {
        let chunk_number = next_chunk_number(existing_tasks);
        let mut task = blank_task(job, scope.layer_id, chunk_number);
        task.detailed_status = DetailedStatus::Benchmarking;
        return Ok(ChunkOutcome::BenchmarkNeeded(Box::new(task)));
    };

    let target_size = (speed * config.chunk_duration_seconds as f64).round().max(1.0) as u64;

    // Mode B: rule splitting, triggered when the natural keyspace-coords
    // chunk (one pass over the base keyspace) is smaller than the target
    // chunk size and rules are actually present.
    if total_rule_count > 0 && base_keyspace > 0 && base_keyspace < target_size {
        return Ok(ChunkOutcome::Chunk(Box::new(build_rule_split_chunk(
            job,
            &scope,
            base_keyspace,
            total_rule_count,
            target_size,
            existing_tasks,
        ))));
    }

    Ok(ChunkOutcome::Chunk(Box::new(build_keyspace_chunk(job, &scope, target_size, speed, config, existing_tasks))))
}

fn build_keyspace_chunk(
    job: &Job,
    scope: &Scope,
    target_size: u64,
    speed: f64,
    config: ChunkingConfig,
    existing_tasks: &[JobTask],
) -> JobTask {
    let remaining = scope.effective_keyspace - scope.dispatched_keyspace;
    let size = target_size.min(remaining); // last chunk clamps to the layer/job end
    let start = scope.dispatched_keyspace;
    let end = start + size;

    let mut task = blank_task(job, scope.layer_id, next_chunk_number(existing_tasks));
    task.keyspace_start = start;
    task.keyspace_end = end;
    task.effective_keyspace_start = scope.global_offset + start;
    task.effective_keyspace_end = scope.global_offset + end;
    task.benchmark_speed = Some(speed);
    task.chunk_duration = config.chunk_duration_seconds;
    task
}

fn build_rule_split_chunk(
    job: &Job,
    scope: &Scope,
    base_keyspace: u64,
    total_rule_count: u64,
    target_size: u64,
    existing_tasks: &[JobTask],
) -> JobTask {
    let rules_per_chunk = (target_size / base_keyspace).max(1);
    let rule_start = existing_tasks
        .iter()
        .filter(|t| t.job_id == job.id && t.is_rule_split_task)
        .filter_map(|t| t.rule_end_index)
        .max()
        .unwrap_or(0);
    let rule_end = (rule_start + rules_per_chunk).min(total_rule_count);

    let mut task = blank_task(job, scope.layer_id, next_chunk_number(existing_tasks));
    task.keyspace_start = 0;
    task.keyspace_end = base_keyspace;
    task.effective_keyspace_start = scope.global_offset + scope.dispatched_keyspace;
    task.effective_keyspace_end = scope.global_offset + scope.dispatched_keyspace + base_keyspace * (rule_end - rule_start);
    task.is_rule_split_task = true;
    task.rule_start_index = Some(rule_start);
    task.rule_end_index = Some(rule_end);
    task.rule_chunk_path = Some(format!("rule-chunks/{}/{}-{}.rule", job.id, rule_start, rule_end));
    task
}

/// Accuracy refinement (spec.md §4.3): when the first progress update
/// reports a different total effective keyspace than the calculator's
/// estimate, call this to update the layer (or job, if `layer` is `None`
/// at the call site) and recompute percentages.
pub fn refine_effective_keyspace(layer: &mut IncrementLayer, reported_total: u64) {
    layer.effective_keyspace = reported_total;
    layer.is_accurate_keyspace = true;
}

pub fn touch_last_checkpoint(task: &mut JobTask) {
    task.last_checkpoint = Some(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use kh_core_math::keyspace::AttackMode;
    use kh_core_math::version::VersionPattern;
    use kh_models::{AttackConfig, JobStatus};

    fn job(effective_keyspace: u64, dispatched_keyspace: u64) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "job".into(),
            hashlist_id: 1,
            priority: 0,
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
            dispatched_keyspace,
            is_accurate_keyspace: true,
            status: JobStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn s1_single_chunk_covers_whole_job() {
        let j = job(1_000_000, 0);
        let outcome = next_chunk(&j, None, 0, 1_000_000, 0, Some(2000.0), &[], ChunkingConfig { chunk_duration_seconds: 900 }).unwrap();
        match outcome {
            ChunkOutcome::Chunk(t) => {
                assert_eq!(t.keyspace_start, 0);
                assert_eq!(t.keyspace_end, 1_000_000);
            }
            other => panic!("expected a chunk, got {other:?}"),
        }
    }

    #[test]
    fn s2_rule_splitting_clamped_to_total_rules() {
        let j = job(500_000, 0);
        let outcome = next_chunk(&j, None, 0, 10, 50_000, Some(1000.0), &[], ChunkingConfig { chunk_duration_seconds: 900 }).unwrap();
        match outcome {
            ChunkOutcome::Chunk(t) => {
                assert!(t.is_rule_split_task);
                assert_eq!(t.rule_start_index, Some(0));
                assert_eq!(t.rule_end_index, Some(50_000));
                assert_eq!(t.keyspace_start, 0);
                assert_eq!(t.keyspace_end, 10);
                assert!(t.rule_chunk_path.is_some());
            }
            other => panic!("expected a rule-split chunk, got {other:?}"),
        }
    }

    #[test]
    fn benchmark_missing_emits_benchmark_task() {
        let j = job(1_000_000, 0);
        let outcome = next_chunk(&j, None, 0, 1_000_000, 0, None, &[], ChunkingConfig::default()).unwrap();
        assert!(matches!(outcome, ChunkOutcome::BenchmarkNeeded(_)));
    }

    #[test]
    fn exhausted_when_fully_dispatched() {
        let j = job(1_000, 1_000);
        let outcome = next_chunk(&j, None, 0, 1_000, 0, Some(10.0), &[], ChunkingConfig::default()).unwrap();
        assert_eq!(outcome, ChunkOutcome::Exhausted);
    }

    #[test]
    fn last_chunk_clamps_to_job_end() {
        let j = job(1_000_000, 999_000);
        let outcome = next_chunk(&j, None, 0, 1_000_000, 0, Some(2000.0), &[], ChunkingConfig { chunk_duration_seconds: 900 }).unwrap();
        match outcome {
            ChunkOutcome::Chunk(t) => {
                assert_eq!(t.keyspace_start, 999_000);
                assert_eq!(t.keyspace_end, 1_000_000);
            }
            other => panic!("expected a chunk, got {other:?}"),
        }
    }
}
