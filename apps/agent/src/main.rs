//! Entry point. Grounded on the controller's own `main.rs` shape:
//! parse config, init tracing, bootstrap state, run until a shutdown
//! signal arrives, then exit cleanly (spec.md §6.3).

use kh_agent::config::{load_credentials, save_credentials, AgentConfig, Credentials};
use kh_agent::connection;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse_from_env();

    let filter = if config.debug { "debug".to_string() } else { config.log_level.clone() };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let credentials = match load_credentials(&config.credentials_path)? {
        Some(creds) => creds,
        None => {
            // Claim-code registration proper talks to an out-of-scope
            // HTTP API; this derives a stable local identity from the
            // claim code so the scheduling/dispatch subsystem has a
            // concrete agent_id to connect with.
            let claim_code = config
                .claim_code
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no credentials on disk and no --claim-code provided"))?;
            let agent_id = derive_agent_id(&claim_code);
            let creds = Credentials { agent_id, api_key: claim_code };
            save_credentials(&config.credentials_path, &creds)?;
            tracing::info!(agent_id, "registered new agent identity");
            creds
        }
    };

    tracing::info!(agent_id = credentials.agent_id, controller = %config.controller_url(), "starting kh-agent");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(());
        }
    });

    connection::run(config, credentials, shutdown_rx).await;

    tracing::info!("kh-agent stopped");
    Ok(())
}

fn derive_agent_id(claim_code: &str) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    claim_code.hash(&mut hasher);
    (hasher.finish() as i64).abs()
}
