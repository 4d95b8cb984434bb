//! Orphan cleanup after hashlist deletion (spec.md §4.8, C9). Hash<->Hashlist
//! membership is a many-to-many relation; per spec.md §9 ("never materialise
//! the graph in memory"), this takes a read-only membership view built by
//! the caller's query layer rather than walking pointers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// UI-facing progress markers streamed while a hashlist is deleted
/// (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanCleanupPhase {
    DeletingHashes,
    ClearingReferences,
    CleaningOrphans,
    Finalizing,
}

impl OrphanCleanupPhase {
    /// The fixed four-phase sequence the UI is told about, in order.
    pub fn next(self) -> Option<Self> {
        match self {
            OrphanCleanupPhase::DeletingHashes => Some(OrphanCleanupPhase::ClearingReferences),
            OrphanCleanupPhase::ClearingReferences => Some(OrphanCleanupPhase::CleaningOrphans),
            OrphanCleanupPhase::CleaningOrphans => Some(OrphanCleanupPhase::Finalizing),
            OrphanCleanupPhase::Finalizing => None,
        }
    }
}

/// Of the hashes that belonged to `deleted_hashlist_id`, return those with
/// no *other* hashlist membership left — the set a deletion run must reap.
/// `membership` maps each hash id to every hashlist id it currently belongs
/// to, as of just before the deletion's `hashlist_hashes` rows were dropped.
pub fn find_orphaned_hashes(membership: &HashMap<Uuid, Vec<i64>>, deleted_hashlist_id: i64) -> Vec<Uuid> {
    membership
        .iter()
        .filter(|(_, hashlists)| hashlists.as_slice() == [deleted_hashlist_id])
        .map(|(hash_id, _)| *hash_id)
        .collect()
}

/// Split a candidate id list into fixed-size batches so a deletion loop
/// streams `cleaning_orphans` progress rather than deleting in one shot.
/// `batch_size == 0` is treated as "one batch" rather than looping forever.
pub fn batches(ids: &[Uuid], batch_size: usize) -> Vec<&[Uuid]> {
    if batch_size == 0 || ids.is_empty() {
        return vec![ids];
    }
    ids.chunks(batch_size).collect()
}
