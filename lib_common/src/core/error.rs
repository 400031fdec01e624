//! Error types for the coordinator engine.

use thiserror::Error;

/// Failures seen by callers of a `CoordinatorHandle`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The request loop has ended.
    #[error("coordinator request loop is not running")]
    Closed,

    #[error("invalid coordinator configuration: {0}")]
    Config(#[from] crate::configs::config_coordinator::ConfigError),
}

/// Refusals produced by the data relay. These are protocol-level: the
/// coordinator turns them into a notice for the offending connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("connection in seat {seat} is not the leader")]
    NotLeader { seat: usize },
}
