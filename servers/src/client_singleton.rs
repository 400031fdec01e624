//! # Singleton Demo Client
//!
//! Attaches to a running `server_singleton`. Every instance prints the data
//! it receives; only the instance that holds leadership produces data, one
//! timestamped sample per `--publish-every-ms`. Start several instances and
//! stop the leader to watch leadership move to the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use lib_common::client::SingletonBuilder;
use lib_common::configs::config_coordinator::{ConfigError, CoordinatorConfig, DEFAULT_SWEEP_INTERVAL};

#[derive(Parser, Debug)]
#[clap(about = "Demo client for the singleton coordinator", version)]
struct Args {
    #[clap(long, env = "SINGLETON_URL", default_value = "ws://127.0.0.1:9010/ws", help = "Coordinator WebSocket URL.")]
    url: String,

    #[clap(long, default_value_t = 1000, help = "Milliseconds between samples while leader.")]
    publish_every_ms: u64,

    #[clap(long, default_value_t = 500, help = "Heartbeat cadence in milliseconds; at most a quarter of --server-expiry-ms.")]
    heartbeat_ms: u64,

    #[clap(long, env = "SINGLETON_EXPIRY_THRESHOLD_MS", default_value_t = 3000, help = "Expiry threshold the server is running with, in milliseconds.")]
    server_expiry_ms: u64,
}

/// Refuses a heartbeat too slow for the server's expiry threshold.
fn check_heartbeat(args: &Args) -> Result<(), ConfigError> {
    let sweep_ms = DEFAULT_SWEEP_INTERVAL.as_millis() as u64;
    CoordinatorConfig::from_millis(sweep_ms, args.server_expiry_ms, args.heartbeat_ms).validate()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    check_heartbeat(&args)?;
    let period = Duration::from_millis(args.publish_every_ms);
    let started = Arc::new(AtomicBool::new(false));
    let started_for_data = Arc::clone(&started);

    let client = SingletonBuilder::new(args.url)
        .heartbeat_interval(Duration::from_millis(args.heartbeat_ms))
        .on_start(move |handle| {
            if started.swap(true, Ordering::SeqCst) {
                return;
            }
            tracing::info!("This instance is now the leader; producing data");
            let handle = handle.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let sample = json!({
                        "time": chrono::Utc::now().to_rfc3339(),
                        "value": "sample produced by the leader",
                    });
                    if handle.set_data(&sample).is_err() {
                        break;
                    }
                }
            });
        })
        .on_data(move |_handle, data| {
            let role = if started_for_data.load(Ordering::SeqCst) { "leader" } else { "follower" };
            tracing::info!(role, %data, "received data");
        })
        .init()
        .await?;

    client.request_data()?;

    signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, leaving the coordinator.");
    client.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(heartbeat_ms: &str, expiry_ms: &str) -> Args {
        Args::parse_from([
            "client_singleton",
            "--heartbeat-ms",
            heartbeat_ms,
            "--server-expiry-ms",
            expiry_ms,
        ])
    }

    #[test]
    fn test_default_heartbeat_is_accepted() {
        assert!(check_heartbeat(&args("500", "3000")).is_ok());
    }

    #[test]
    fn test_slow_heartbeat_is_refused() {
        assert!(matches!(
            check_heartbeat(&args("1000", "3000")),
            Err(ConfigError::HeartbeatRatio { ratio: 4, .. })
        ));
    }
}
