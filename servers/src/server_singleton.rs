//! # Singleton Coordinator Server
//!
//! Keeps exactly one leader among any number of WebSocket clients. The
//! leader is the only client allowed to publish the shared payload; every
//! other client receives it. Clients that stop sending heartbeats are
//! expired and leadership passes to the earliest surviving client.
//!
//! ## Endpoints:
//! - **`/ws`**: one WebSocket per connection (`heartbeat`, `closing`, `get`,
//!   or a JSON payload to publish).
//! - **`/health`**: liveness probe.
//! - **`/status`**: JSON snapshot of the coordinator state.

use anyhow::Result;
use tokio::signal;

use lib_common::core::CoordinatorService;
use servers::singleton_logic::{config, downstream, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // load .env files before anything else
    dotenvy::dotenv().ok();

    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (config, config_note) = config::load_config()?;
    let _log_guard = logger::setup_logging(&config.log_dir, &config.log_level, "server_singleton")?;
    config_note.log();
    log::info!("{}", config.coordinator);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let (coordinator, coordinator_task) = CoordinatorService::spawn(config.coordinator)?;

    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        coordinator,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    match downstream_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Downstream server failed: {}", e),
        Err(e) => log::error!("Downstream task panicked: {}", e),
    }

    // Upgraded sockets may still hold handles; nothing is persisted, so stop the loop outright.
    coordinator_task.abort();

    log::info!("Shutdown complete.");
    Ok(())
}
