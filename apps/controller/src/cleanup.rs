//! Orphan-hash cleanup on hashlist deletion (spec.md §4.8, C9). Hashlist
//! deletion itself is driven by the out-of-scope HTTP surface (spec.md §1);
//! this module is what that caller invokes once the delete is authorized.
//! Grounded on `reaper.rs`'s shape: pure decision in `kh-scheduler`, I/O and
//! event emission here.

use kh_scheduler::reliability::plan_orphan_cleanup;

use crate::event_bus::RealTimeEvent;
use crate::state::AppState;
use crate::ControllerError;

/// Run the four-phase orphan-cleanup sequence for `hashlist_id`, streaming
/// `RealTimeEvent::HashlistCleanupProgress` as each phase starts. Returns
/// the number of hashes actually deleted.
pub async fn run_orphan_cleanup(state: &AppState, hashlist_id: i64) -> Result<usize, ControllerError> {
    let emit = |phase| state.event_bus.emit(RealTimeEvent::HashlistCleanupProgress { hashlist_id, phase });

    emit(kh_models::OrphanCleanupPhase::DeletingHashes);
    let membership = state.store.hash_memberships(hashlist_id).await?;
    let plan = plan_orphan_cleanup(&membership, hashlist_id, state.config.orphan_cleanup_batch_size);

    emit(kh_models::OrphanCleanupPhase::ClearingReferences);
    state.store.unlink_hashlist(hashlist_id).await?;

    emit(kh_models::OrphanCleanupPhase::CleaningOrphans);
    let mut deleted = 0usize;
    for batch in &plan.orphaned_batches {
        state.store.delete_hashes(batch).await?;
        deleted += batch.len();
        tracing::debug!(hashlist_id, batch_size = batch.len(), "reaped orphaned hash batch");
    }

    emit(kh_models::OrphanCleanupPhase::Finalizing);
    state.store.delete_hashlist(hashlist_id).await?;

    tracing::info!(hashlist_id, deleted, "orphan cleanup complete");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clap::Parser;
    use kh_models::{Hash, Hashlist, HashlistStatus};
    use kh_store::{InMemoryStore, Store};
    use uuid::Uuid;

    use super::*;
    use crate::config::ControllerConfig;
    use crate::event_bus::EventBus;
    use crate::state::AppState;

    fn test_config() -> ControllerConfig {
        ControllerConfig::parse_from(["kh-controller"])
    }

    fn hashlist(id: i64) -> Hashlist {
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

    fn hash(id: Uuid) -> Hash {
        Hash {
            id,
            hash_value: "abc".into(),
            original_hash: "abc".into(),
            hash_type_id: 1000,
            is_cracked: false,
            password: None,
            username: None,
            domain: None,
            last_updated: chrono::Utc::now(),
            lm_state: None,
            linked_hash: None,
        }
    }

    #[tokio::test]
    async fn cleanup_reaps_orphan_and_spares_shared_hash() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        store.upsert_hashlist(hashlist(1)).await.unwrap();
        store.upsert_hashlist(hashlist(2)).await.unwrap();
        let orphan = Uuid::new_v4();
        let shared = Uuid::new_v4();
        store.upsert_hash(hash(orphan)).await.unwrap();
        store.upsert_hash(hash(shared)).await.unwrap();
        store.link_hash_to_hashlist(orphan, 1).await.unwrap();
        store.link_hash_to_hashlist(shared, 1).await.unwrap();
        store.link_hash_to_hashlist(shared, 2).await.unwrap();

        let state = AppState::new(test_config(), store.clone());
        let mut events = state.event_bus.subscribe();

        let deleted = run_orphan_cleanup(&state, 1).await.unwrap();
        assert_eq!(deleted, 1);

        let mut phases = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RealTimeEvent::HashlistCleanupProgress { phase, .. } = event {
                phases.push(phase);
            }
        }
        assert_eq!(
            phases,
            vec![
                kh_models::OrphanCleanupPhase::DeletingHashes,
                kh_models::OrphanCleanupPhase::ClearingReferences,
                kh_models::OrphanCleanupPhase::CleaningOrphans,
                kh_models::OrphanCleanupPhase::Finalizing,
            ]
        );
    }
}
