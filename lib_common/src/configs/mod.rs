//! # Configuration Modules
//!
//! Timing configuration shared by the coordinator engine and its clients.

/// Sweep interval, expiry threshold and heartbeat cadence, with validation.
pub mod config_coordinator;
