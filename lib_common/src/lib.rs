//! # lib_common
//!
//! Shared library for the singleton coordinator workspace. The engine lives
//! under [`core`], its timing parameters under [`configs`], and the
//! application-side attachment under [`client`].

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "client")]
pub mod client;

// Re-export the most used entry points
#[cfg(feature = "configs")]
pub use configs::config_coordinator::*;
#[cfg(feature = "core")]
pub use core::{CoordinatorHandle, CoordinatorService};
