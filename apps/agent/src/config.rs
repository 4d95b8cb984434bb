//! Agent CLI/env configuration, grounded on the controller's own
//! clap derive + env pattern (`apps/controller/src/config.rs`), plus
//! a local credentials file bootstrapped on first run (spec.md §6.2:
//! an agent registers once with a claim code, then persists the
//! `agent_id`/API key it's issued for every run after).

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;

#[derive(Debug, Clone, Parser)]
#[command(name = "kh-agent", about = "KrakenHashes agent")]
pub struct AgentConfig {
    /// Controller host to connect to.
    #[arg(long, env = "KH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "KH_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Use wss:// instead of ws://. TLS termination itself is out of
    /// scope here (DESIGN.md open-question decision #6); this flag
    /// only picks the URL scheme for a front-end proxy to terminate.
    #[arg(long, env = "KH_USE_TLS", default_value_t = false)]
    pub use_tls: bool,

    /// One-time claim code used to register a brand-new agent. Not
    /// needed once `credentials_path` holds a persisted identity.
    #[arg(long, env = "KH_CLAIM_CODE")]
    pub claim_code: Option<String>,

    #[arg(long, env = "KH_CREDENTIALS_PATH", default_value = "kh-agent-credentials.json")]
    pub credentials_path: PathBuf,

    #[arg(long, env = "KH_HEARTBEAT_INTERVAL", default_value_t = 5)]
    pub heartbeat_interval_seconds: u32,

    /// Base reconnect backoff, doubled on each consecutive failure
    /// and capped at `reconnect_backoff_cap_seconds`.
    #[arg(long, env = "KH_RECONNECT_BACKOFF_SECONDS", default_value_t = 1)]
    pub reconnect_backoff_seconds: u64,

    #[arg(long, env = "KH_RECONNECT_BACKOFF_CAP_SECONDS", default_value_t = 60)]
    pub reconnect_backoff_cap_seconds: u64,

    #[arg(long, env = "KH_DEBUG", default_value_t = false)]
    pub debug: bool,

    #[arg(long, env = "KH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AgentConfig {
    pub fn parse_from_env() -> Self {
        AgentConfig::parse()
    }

    pub fn controller_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/ws", self.host, self.port)
    }
}

/// The identity an agent is issued after claiming, persisted locally so
/// subsequent runs skip registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub agent_id: i64,
    pub api_key: String,
}

pub fn load_credentials(path: &Path) -> Result<Option<Credentials>, AgentError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Writes the credentials file with owner-only permissions (0600 on
/// unix), matching how a private key would be handled.
pub fn save_credentials(path: &Path, credentials: &Credentials) -> Result<(), AgentError> {
    let content = serde_json::to_string_pretty(credentials)?;
    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        let creds = Credentials { agent_id: 42, api_key: "secret".into() };
        save_credentials(&path, &creds).unwrap();
        let loaded = load_credentials(&path).unwrap().unwrap();
        assert_eq!(loaded.agent_id, 42);
        assert_eq!(loaded.api_key, "secret");
    }

    #[test]
    fn missing_file_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert!(load_credentials(&path).unwrap().is_none());
    }

    #[test]
    fn controller_url_picks_scheme() {
        let mut cfg = AgentConfig::parse_from(["kh-agent"]);
        cfg.host = "example.internal".into();
        cfg.port = 9000;
        assert_eq!(cfg.controller_url(), "ws://example.internal:9000/ws");
        cfg.use_tls = true;
        assert_eq!(cfg.controller_url(), "wss://example.internal:9000/ws");
    }
}
