//! # Core Engine Module
//!
//! This module is the singleton coordinator: it keeps exactly one leader
//! among any number of attached connections, relays the leader's payload to
//! everyone, and detects silently dead connections through heartbeats.
//!
//! ## Core Components:
//!
//! - **`registry`**: Ordered arena of connection slots. Seats are stable and
//!   departures leave tombstones.
//!
//! - **`monitor`**: Periodic liveness sweep that starts with the first
//!   connection and stops when the registry empties.
//!
//! - **`leadership`**: The single leader reference, self-appointment on
//!   attach and succession on departure.
//!
//! - **`relay`**: The shared payload slot, readable by all and writable by
//!   the leader only.
//!
//! - **`coordinator`**: Composition root that routes every event and does
//!   the unicast and broadcast work.
//!
//! - **`handle`**: The serialized request loop and the cloneable handle that
//!   transports use to reach it.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Composition root and event dispatch.
pub mod coordinator;
/// Engine error types.
pub mod error;
/// Request loop and handle.
pub mod handle;
/// Leader reference and succession.
pub mod leadership;
/// Heartbeat sweep task.
pub mod monitor;
/// Inbound and outbound wire messages.
pub mod protocol;
/// Connection arena with stable seats.
pub mod registry;
/// Leader-gated payload slot.
pub mod relay;

// --- Public API Re-exports ---
pub use coordinator::{Coordinator, CoordinatorSnapshot, Departure};
pub use error::{CoordinatorError, RelayError};
pub use handle::{Attachment, CoordRequest, CoordinatorHandle, CoordinatorService};
pub use leadership::{Leadership, Succession};
pub use monitor::LivenessMonitor;
pub use protocol::{Inbound, Notice, ServerMessage};
pub use registry::{Connection, ConnectionId, Registry};
pub use relay::DataRelay;
