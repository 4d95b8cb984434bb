//! Reliability layer (C9): stale-task detection, layer advancement, and
//! rule-chunk-file lifecycle. These are pure decision functions; the
//! owning background loops (the actual `tokio::spawn` tick timers) live
//! in `kh-controller`, grounded on
//! `apps/orchestrator/src/services/reaper.rs`'s `spawn_reaper` shape.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use kh_models::{find_orphaned_hashes, orphan_batches, IncrementLayer, JobTask, LayerStatus, OrphanCleanupPhase, TaskStatus};

/// Staleness threshold config — DESIGN.md open-question decision #3:
/// `min(3 * chunk_duration, 10 min)`, with both halves independently
/// configurable rather than hardcoded.
#[derive(Debug, Clone, Copy)]
pub struct StaleConfig {
    pub multiplier: u32,
    pub cap_seconds: u32,
}

impl Default for StaleConfig {
    fn default() -> Self {
        StaleConfig { multiplier: 3, cap_seconds: 600 }
    }
}

impl StaleConfig {
    pub fn threshold(&self, chunk_duration_seconds: u32) -> Duration {
        let scaled = chunk_duration_seconds.saturating_mul(self.multiplier);
        Duration::seconds(scaled.min(self.cap_seconds) as i64)
    }
}

/// True if `task` (in {assigned, running}) has gone stale against `now`.
pub fn is_stale(task: &JobTask, now: DateTime<Utc>, config: StaleConfig) -> bool {
    if !matches!(task.status, TaskStatus::Assigned | TaskStatus::Running) {
        return false;
    }
    let threshold = config.threshold(task.chunk_duration.max(1));
    let reference = task.last_checkpoint.or(task.assigned_at);
    match reference {
        Some(t) => now - t > threshold,
        None => false,
    }
}

/// spec.md §4.8: once the last task of a layer terminates successfully
/// and its dispatched keyspace equals its effective keyspace, it moves to
/// `completed` and the next layer (if any) becomes `pending`.
pub fn advance_layer(layers: &mut [IncrementLayer], completed_layer_id: uuid::Uuid) {
    let mut sorted_indices: Vec<usize> = (0..layers.len()).collect();
    sorted_indices.sort_by_key(|&i| layers[i].layer_index);

    if let Some(pos) = sorted_indices.iter().position(|&i| layers[i].id == completed_layer_id) {
        let i = sorted_indices[pos];
        if layers[i].dispatched_keyspace >= layers[i].effective_keyspace {
            layers[i].status = LayerStatus::Completed;
        }
        if let Some(&next_i) = sorted_indices.get(pos + 1) {
            if layers[next_i].status == LayerStatus::Pending && !layers[next_i].is_accurate_keyspace {
                layers[next_i].status = LayerStatus::Benchmarking;
            }
        }
    }
}

/// DESIGN.md open-question decision #4: a rule-chunk file is retired once
/// its task reaches a terminal state *and* is not going to be retried.
/// Kept alive across an `error -> pending` retry (the engine re-reads the
/// same range); removed on `completed`/`failed`/`cancelled`, or on an
/// `error` whose retries are exhausted.
pub fn rule_chunk_retireable(task: &JobTask, max_retries: u32) -> bool {
    if !task.is_rule_split_task || task.rule_chunk_path.is_none() {
        return false;
    }
    match task.status {
        TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => true,
        TaskStatus::Error => task.retry_count >= max_retries,
        _ => false,
    }
}

/// A decided, ready-to-execute orphan-cleanup run (spec.md §4.8): the fixed
/// phase sequence paired with the hash-id batches `cleaning_orphans` must
/// delete. Storage I/O for each phase is the caller's job (`kh-store` has
/// no opinion on hash persistence beyond the methods it exposes); this
/// function only decides *what* to delete and in what batches.
#[derive(Debug, Clone)]
pub struct OrphanCleanupPlan {
    pub phases: [OrphanCleanupPhase; 4],
    pub orphaned_batches: Vec<Vec<Uuid>>,
}

/// Decide an orphan-cleanup plan for a just-deleted hashlist. `membership`
/// maps every hash that belonged to `deleted_hashlist_id` to the full set
/// of hashlists it belongs to (see `kh_store::Store::hash_memberships`).
pub fn plan_orphan_cleanup(
    membership: &HashMap<Uuid, Vec<i64>>,
    deleted_hashlist_id: i64,
    batch_size: usize,
) -> OrphanCleanupPlan {
    let orphans = find_orphaned_hashes(membership, deleted_hashlist_id);
    let orphaned_batches = orphan_batches(&orphans, batch_size).into_iter().map(|b| b.to_vec()).collect();
    OrphanCleanupPlan {
        phases: [
            OrphanCleanupPhase::DeletingHashes,
            OrphanCleanupPhase::ClearingReferences,
            OrphanCleanupPhase::CleaningOrphans,
            OrphanCleanupPhase::Finalizing,
        ],
        orphaned_batches,
    }
}
