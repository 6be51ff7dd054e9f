//! Quiz State Service: owns a state manager and serves the sync endpoint.
//!
//! Default: http://127.0.0.1:8765/

use quiz_state_service::{AppState, Catalog, Config, ControlServer, StateManager};
use std::sync::Arc;
use std::time::Instant;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    log::info!("Opening state at: {}", config.state_path.display());
    let catalog = Arc::new(Catalog::open(&config.catalog_path));
    let manager = Arc::new(StateManager::open(&config, catalog));
    if !manager.start() {
        log::warn!("Continuing without file watching; sibling writes arrive only via the sync endpoint");
    }

    manager.subscribe(|records| {
        log::info!("[STATE] State changed: {} participants", records.len());
        Ok(())
    });

    let state = Arc::new(AppState {
        manager: manager.clone(),
        start_time: Instant::now(),
    });

    let server = ControlServer::bind(config.sync_port, state, config.request_timeout)
        .await
        .expect("Failed to bind sync endpoint");

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
    log::info!("Shutting down");

    server.shutdown().await;
    manager.stop();
}
