//! Entry point. Grounded on `apps/miner-worker/src/main.rs`'s shape:
//! parse config, init tracing, build the composition root, run until a
//! shutdown signal.

use std::sync::Arc;

use kh_controller::dispatch_loop::spawn_dispatch_loop;
use kh_controller::reaper::{spawn_offline_buffer_sweeper, spawn_stale_task_sweeper};
use kh_controller::{routes, AppState, ControllerConfig};
use kh_core_math::version::{ActiveBinary, Version};
use kh_store::InMemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::parse_from_env();

    let filter = if config.debug {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    tracing::info!(listen = %config.listen_interface, "starting kh-controller");

    let store = Arc::new(InMemoryStore::new());
    let state = AppState::new(config.clone(), store);

    // Placeholder active-binary catalogue; a real deployment loads this
    // from the (out-of-scope) binary-storage subsystem.
    let active_binaries = vec![ActiveBinary {
        id: 1,
        version: Version::parse("7.1.2").expect("well-formed built-in default version"),
        is_default: true,
        is_active: true,
    }];

    spawn_dispatch_loop(state.clone(), active_binaries);
    spawn_stale_task_sweeper(state.clone());
    spawn_offline_buffer_sweeper(state.clone());

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_interface).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(%err, "server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    Ok(())
}
