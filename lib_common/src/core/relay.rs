//! # Data Relay
//!
//! The single shared payload slot. Reads are unconditional; writes are gated
//! on leadership. Fan-out of an accepted payload is done by the coordinator.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use serde_json::Value;

use crate::core::error::RelayError;
use crate::core::leadership::Leadership;
use crate::core::registry::ConnectionId;

#[derive(Debug, Default)]
pub struct DataRelay {
    payload: Option<Value>,
}

impl DataRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published payload; `None` until the first accepted publish.
    pub fn get(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Stores `payload` if `sender` is the current leader and returns the
    /// stored value for broadcasting. A non-leader gets `NotLeader` and the
    /// stored payload is left untouched.
    pub fn publish(
        &mut self,
        leadership: &Leadership,
        sender: ConnectionId,
        payload: Value,
    ) -> Result<&Value, RelayError> {
        if !leadership.is_leader(sender) {
            return Err(RelayError::NotLeader {
                seat: sender.seat(),
            });
        }
        Ok(self.payload.insert(payload))
    }
}
