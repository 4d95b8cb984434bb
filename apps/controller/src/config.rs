//! Controller CLI/env configuration surface. Grounded on
//! `apps/miner-worker/src/main.rs`'s `SovereignWorkerDirectives`
//! (clap derive + env pattern), adapted to controller-side options.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "kh-controller", about = "KrakenHashes scheduling & dispatch controller")]
pub struct ControllerConfig {
    /// Interface to bind the agent control channel and health endpoint to.
    #[arg(long, env = "KH_LISTEN_INTERFACE", default_value = "0.0.0.0:8080")]
    pub listen_interface: String,

    /// Agent heartbeat interval agents are told to use, in seconds.
    #[arg(long, env = "KH_HEARTBEAT_INTERVAL", default_value_t = 5)]
    pub heartbeat_interval_seconds: u32,

    /// Missed-heartbeat streak before an agent is marked inactive.
    #[arg(long, env = "KH_MISSED_HEARTBEAT_LIMIT", default_value_t = 3)]
    pub missed_heartbeat_limit: u32,

    /// Grace period before an offline notification fires for a
    /// disconnected agent, in seconds.
    #[arg(long, env = "KH_OFFLINE_GRACE_SECONDS", default_value_t = 120)]
    pub offline_grace_seconds: u32,

    /// Default chunk duration target, in seconds.
    #[arg(long, env = "KH_CHUNK_DURATION_SECONDS", default_value_t = 900)]
    pub chunk_duration_seconds: u32,

    /// Bound on task retries before a chunk is abandoned as `failed`.
    #[arg(long, env = "KH_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Stale-task threshold multiplier, applied to a task's own
    /// `chunk_duration` (DESIGN.md open-question decision #3).
    #[arg(long, env = "KH_STALE_MULTIPLIER", default_value_t = 3)]
    pub stale_multiplier: u32,

    /// Stale-task threshold cap, in seconds.
    #[arg(long, env = "KH_STALE_CAP_SECONDS", default_value_t = 600)]
    pub stale_cap_seconds: u32,

    /// Dispatcher tick interval when no event wakes it early, in seconds.
    #[arg(long, env = "KH_DISPATCH_TICK_SECONDS", default_value_t = 5)]
    pub dispatch_tick_seconds: u32,

    /// Batch size for orphaned-hash deletion on hashlist removal
    /// (spec.md §4.8).
    #[arg(long, env = "KH_ORPHAN_CLEANUP_BATCH_SIZE", default_value_t = 1000)]
    pub orphan_cleanup_batch_size: usize,

    /// Root directory holding the wordlist/rule content the keyspace
    /// calculator reads line counts from (spec.md §6.2 "data directory",
    /// path-addressed as `{data_dir}/wordlists/{id}.txt` and
    /// `{data_dir}/rules/{id}.rule`).
    #[arg(long, env = "KH_DATA_DIR", default_value = "kh-data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "KH_DEBUG", default_value_t = false)]
    pub debug: bool,

    #[arg(long, env = "KH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ControllerConfig {
    pub fn parse_from_env() -> Self {
        ControllerConfig::parse()
    }
}
