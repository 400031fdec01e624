//! # Coordinator Timing Configuration
//!
//! Holds the three durations that decide liveness: how often the monitor
//! sweeps, how stale a heartbeat may get before the connection is expired,
//! and how often well-behaved clients are expected to send heartbeats.
//!
//! The heartbeat cadence is not enforced by the coordinator; it is recorded
//! here so that `validate` can reject a deployment where normal message
//! latency would cause false expiries.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default sweep period of the liveness monitor.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(3000);
/// Default age at which a heartbeat is considered stale.
pub const DEFAULT_EXPIRY_THRESHOLD: Duration = Duration::from_millis(3000);
/// Default client heartbeat cadence.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);
/// Minimum ratio between the expiry threshold and the heartbeat cadence.
pub const MIN_HEARTBEAT_RATIO: u32 = 4;

/// Why a `CoordinatorConfig` was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error(
        "expiry threshold ({expiry_ms} ms) must be at least {ratio}x the heartbeat interval ({heartbeat_ms} ms)"
    )]
    HeartbeatRatio {
        expiry_ms: u128,
        heartbeat_ms: u128,
        ratio: u32,
    },
}

/// Liveness timing shared by the monitor and validated at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub sweep_interval: Duration,
    pub expiry_threshold: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            expiry_threshold: DEFAULT_EXPIRY_THRESHOLD,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    /// Builds a config from millisecond values, as they come from CLI flags.
    pub fn from_millis(sweep_ms: u64, expiry_ms: u64, heartbeat_ms: u64) -> Self {
        Self {
            sweep_interval: Duration::from_millis(sweep_ms),
            expiry_threshold: Duration::from_millis(expiry_ms),
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
        }
    }

    /// Checks that every duration is non-zero and that the expiry threshold
    /// leaves room for at least `MIN_HEARTBEAT_RATIO` heartbeats.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("sweep interval"));
        }
        if self.expiry_threshold.is_zero() {
            return Err(ConfigError::ZeroDuration("expiry threshold"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("heartbeat interval"));
        }
        if self.expiry_threshold < self.heartbeat_interval * MIN_HEARTBEAT_RATIO {
            return Err(ConfigError::HeartbeatRatio {
                expiry_ms: self.expiry_threshold.as_millis(),
                heartbeat_ms: self.heartbeat_interval.as_millis(),
                ratio: MIN_HEARTBEAT_RATIO,
            });
        }
        Ok(())
    }
}

impl fmt::Display for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CoordinatorConfig
    Sweep interval: {} ms,
    Expiry threshold: {} ms,
    Heartbeat interval: {} ms",
            self.sweep_interval.as_millis(),
            self.expiry_threshold.as_millis(),
            self.heartbeat_interval.as_millis()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.expiry_threshold, Duration::from_millis(3000));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_ratio_below_four_is_rejected() {
        let config = CoordinatorConfig::from_millis(3000, 3000, 1000);
        assert_eq!(
            config.validate(),
            Err(ConfigError::HeartbeatRatio {
                expiry_ms: 3000,
                heartbeat_ms: 1000,
                ratio: 4
            })
        );
    }

    #[test]
    fn test_exact_ratio_is_accepted() {
        let config = CoordinatorConfig::from_millis(1000, 2000, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let config = CoordinatorConfig::from_millis(0, 3000, 500);
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("sweep interval"))
        );
    }
}
