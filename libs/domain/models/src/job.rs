//! Job (JobExecution) and JobIncrementLayer (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kh_core_math::keyspace::AttackMode;
use kh_core_math::version::VersionPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn is_schedulable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// The attack configuration a job was submitted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackConfig {
    pub attack_mode: AttackMode,
    pub wordlist_ids: Vec<i64>,
    pub rule_ids: Vec<i64>,
    pub mask: Option<String>,
    pub increment_min: Option<u32>,
    pub increment_max: Option<u32>,
}

impl AttackConfig {
    pub fn uses_increment(&self) -> bool {
        self.increment_min.is_some() && self.increment_max.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub hashlist_id: i64,
    pub priority: i32,
    pub attack: AttackConfig,
    pub preset_job_id: Option<i64>,
    pub binary_version_pattern: VersionPattern,
    pub chunk_size_seconds: u32,
    pub allow_high_priority_override: bool,
    pub overall_status_label: String,
    pub created_by: i64,

    pub total_keyspace: u64,
    pub processed_keyspace: u64,
    pub effective_keyspace: u64,
    pub dispatched_keyspace: u64,
    pub is_accurate_keyspace: bool,

    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn overall_progress_percent(&self) -> f64 {
        if self.effective_keyspace == 0 {
            return 0.0;
        }
        (self.processed_keyspace as f64 / self.effective_keyspace as f64) * 100.0
    }

    /// spec.md §3 Job invariants, checked together for convenience.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.dispatched_keyspace > self.effective_keyspace {
            return Err("dispatched_keyspace exceeds effective_keyspace".into());
        }
        if self.processed_keyspace > self.dispatched_keyspace {
            return Err("processed_keyspace exceeds dispatched_keyspace".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerStatus {
    Pending,
    Benchmarking,
    Running,
    Completed,
}

/// One mask length of an incremented mask attack (spec.md §3
/// "JobIncrementLayer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementLayer {
    pub id: Uuid,
    pub job_id: Uuid,
    pub layer_index: u32,
    pub mask: String,
    pub status: LayerStatus,
    pub base_keyspace: u64,
    pub effective_keyspace: u64,
    pub processed_keyspace: u64,
    pub dispatched_keyspace: u64,
    pub is_accurate_keyspace: bool,
}

impl IncrementLayer {
    pub fn overall_progress_percent(&self) -> f64 {
        if self.effective_keyspace == 0 {
            return 0.0;
        }
        (self.processed_keyspace as f64 / self.effective_keyspace as f64) * 100.0
    }
}

/// The layer that becomes `running` only once every layer with a smaller
/// index is `completed` (spec.md §3 JobIncrementLayer invariant).
pub fn next_schedulable_layer(layers: &[IncrementLayer]) -> Option<&IncrementLayer> {
    let mut sorted: Vec<&IncrementLayer> = layers.iter().collect();
    sorted.sort_by_key(|l| l.layer_index);
    sorted.into_iter().find(|l| l.status != LayerStatus::Completed)
}

/// Sum of `effective_keyspace` over every layer with a smaller index than
/// `current` — the cumulative offset that turns `current`'s per-layer
/// coordinates into the global coordinates `effective_keyspace_start/end`
/// are specified in (spec.md §4.3). Zero for non-incremented attacks.
pub fn global_offset(layers: &[IncrementLayer], current: Option<&IncrementLayer>) -> u64 {
    match current {
        None => 0,
        Some(cur) => layers.iter().filter(|l| l.layer_index < cur.layer_index).map(|l| l.effective_keyspace).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(index: u32, status: LayerStatus) -> IncrementLayer {
        IncrementLayer {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            layer_index: index,
            mask: "?l?l?l?l".into(),
            status,
            base_keyspace: 456_976,
            effective_keyspace: 456_976,
            processed_keyspace: 0,
            dispatched_keyspace: 0,
            is_accurate_keyspace: true,
        }
    }

    #[test]
    fn s3_layers_scheduled_strictly_in_order() {
        let layers = vec![
            layer(0, LayerStatus::Completed),
            layer(1, LayerStatus::Pending),
            layer(2, LayerStatus::Pending),
        ];
        let next = next_schedulable_layer(&layers).unwrap();
        assert_eq!(next.layer_index, 1);
    }

    #[test]
    fn s3_global_offset_sums_completed_lower_layers() {
        let mut l0 = layer(0, LayerStatus::Completed);
        l0.effective_keyspace = 456_976;
        let mut l1 = layer(1, LayerStatus::Running);
        l1.effective_keyspace = 11_881_376;
        let l2 = layer(2, LayerStatus::Pending);
        let layers = vec![l0, l1.clone(), l2];

        assert_eq!(global_offset(&layers, None), 0);
        assert_eq!(global_offset(&layers, Some(&l1)), 456_976);
    }

    #[test]
    fn job_invariant_rejects_overdispatch() {
        let job = Job {
            id: Uuid::new_v4(),
            name: "j".into(),
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
            total_keyspace: 100,
            processed_keyspace: 0,
            effective_keyspace: 100,
            dispatched_keyspace: 150,
            is_accurate_keyspace: true,
            status: JobStatus::Running,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        assert!(job.check_invariants().is_err());
    }
}
