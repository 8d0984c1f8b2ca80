//! `autopilotd run`: open the store, seed it, start the controller and
//! serve the API until Ctrl-C.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use autopilot_core::AutopilotConfig;
use autopilot_core::config::DEFAULT_PORT;
use autopilot_engine::{Controller, LogActuator};
use autopilot_state::StateStore;

use crate::seed::seed;

const DEFAULT_DATA_DIR: &str = "/var/lib/autopilot";

pub async fn run(
    config: AutopilotConfig,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Autopilot daemon starting");
    config.validate()?;
    let settings = config.engine_settings()?;

    let port = port.or(config.server.port).unwrap_or(DEFAULT_PORT);
    let data_dir = data_dir
        .or_else(|| config.server.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    // ── State store ────────────────────────────────────────────

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("autopilot.redb");
    let store = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "state store opened");

    // ── Controller ─────────────────────────────────────────────

    // No infrastructure backend is wired in; actions are logged only.
    let controller = Controller::new(store, Arc::new(LogActuator), settings.clone());
    info!(
        hysteresis = settings.hysteresis_factor,
        timeout_ms = settings.action_timeout.as_millis() as u64,
        history = settings.history_limit,
        "controller initialized"
    );
    seed(&controller, &config)?;

    // ── API server ─────────────────────────────────────────────

    let router = autopilot_api::build_router(controller.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    // Let queued cycles finish so every decision reaches the audit trail.
    controller.shutdown().await;

    info!("Autopilot daemon stopped");
    Ok(())
}
