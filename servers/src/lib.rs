//! Server-side building blocks for the singleton coordinator binaries.

pub mod singleton_logic;
