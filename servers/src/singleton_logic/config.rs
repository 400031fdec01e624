use clap::Parser;
use lib_common::configs::config_coordinator::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_singleton.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Singleton leader coordinator over WebSocket", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "SINGLETON_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "SINGLETON_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "SINGLETON_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "SINGLETON_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SINGLETON_SWEEP_INTERVAL_MS", help = "Milliseconds between liveness sweeps.")]
    pub sweep_interval_ms: Option<u64>,

    #[clap(long, env = "SINGLETON_EXPIRY_THRESHOLD_MS", help = "Milliseconds without a heartbeat before a connection is expired.")]
    pub expiry_threshold_ms: Option<u64>,

    #[clap(long, env = "SINGLETON_HEARTBEAT_INTERVAL_MS", help = "Heartbeat cadence expected from clients, in milliseconds.")]
    pub heartbeat_interval_ms: Option<u64>,

    #[clap(long, env = "TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

/// Fully resolved settings used by the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub coordinator: CoordinatorConfig,
    pub tls: Option<TlsPaths>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsPaths {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Config {
    fn defaults() -> Config {
        let timing = CoordinatorConfig::default();
        Config {
            port: Some(9010),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            sweep_interval_ms: Some(timing.sweep_interval.as_millis() as u64),
            expiry_threshold_ms: Some(timing.expiry_threshold.as_millis() as u64),
            heartbeat_interval_ms: Some(timing.heartbeat_interval.as_millis() as u64),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            sweep_interval_ms: other.sweep_interval_ms.or(self.sweep_interval_ms),
            expiry_threshold_ms: other.expiry_threshold_ms.or(self.expiry_threshold_ms),
            heartbeat_interval_ms: other.heartbeat_interval_ms.or(self.heartbeat_interval_ms),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn resolve(self) -> anyhow::Result<ServerConfig> {
        let defaults = Config::defaults();
        let merged = defaults.merge(self);

        let coordinator = CoordinatorConfig::from_millis(
            merged.sweep_interval_ms.unwrap_or_default(),
            merged.expiry_threshold_ms.unwrap_or_default(),
            merged.heartbeat_interval_ms.unwrap_or_default(),
        );
        coordinator.validate()?;

        let tls = match (merged.tls_cert_path, merged.tls_key_path) {
            (Some(cert_path), Some(key_path)) => Some(TlsPaths { cert_path, key_path }),
            (None, None) => default_tls_paths(),
            _ => anyhow::bail!("TLS needs both a certificate and a key path"),
        };

        Ok(ServerConfig {
            port: merged.port.unwrap_or(9010),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            coordinator,
            tls,
        })
    }
}

/// LetsEncrypt files under the home directory, used only if both exist.
fn default_tls_paths() -> Option<TlsPaths> {
    let letsencrypt_dir = dirs::home_dir()?.join(".letsencrypt");
    let cert_path = letsencrypt_dir.join("fullchain.pem");
    let key_path = letsencrypt_dir.join("privkey.pem");
    if cert_path.exists() && key_path.exists() {
        Some(TlsPaths { cert_path, key_path })
    } else {
        None
    }
}

/// A message produced while loading, before any logger exists.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupNote {
    pub level: log::Level,
    pub message: String,
}

impl StartupNote {
    fn new(level: log::Level, message: String) -> Self {
        Self { level, message }
    }

    /// Emits the note; call once logging is set up.
    pub fn log(&self) {
        log::log!(self.level, "{}", self.message);
    }
}

fn read_config_file(path: &Path) -> (Option<Config>, StartupNote) {
    if !path.exists() {
        let message = format!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return (None, StartupNote::new(log::Level::Info, message));
    }
    let config_str = match fs::read_to_string(path) {
        Ok(config_str) => config_str,
        Err(e) => {
            let message = format!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return (None, StartupNote::new(log::Level::Warn, message));
        }
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => {
            let message = format!("Loaded config file {}", path.display());
            (Some(file_config), StartupNote::new(log::Level::Info, message))
        }
        Err(e) => {
            let message = format!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            (None, StartupNote::new(log::Level::Warn, message))
        }
    }
}

/// Layers defaults, the optional config file, and CLI/env values (highest).
/// The returned note describes what happened to the config file.
pub fn load_config_from(cli: Config) -> anyhow::Result<(ServerConfig, StartupNote)> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let (file_config, note) = read_config_file(&config_file_path);
    let layered = match file_config {
        Some(file_config) => file_config.merge(cli),
        None => cli,
    };
    Ok((layered.resolve()?, note))
}

pub fn load_config() -> anyhow::Result<(ServerConfig, StartupNote)> {
    load_config_from(Config::parse())
}
