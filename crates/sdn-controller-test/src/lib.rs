//! Integration test infrastructure for the SDN overlay controller
//!
//! Provides:
//! - An in-memory pool implementing the infrastructure API
//! - A recording virtual-switch protocol
//! - Fixtures for pools, hosts, overlays and credentials
//! - Overlay invariant and tunnel status verification helpers

pub mod fixtures;
mod memory_pool;
mod recording_switch;
mod verification;

pub use fixtures::*;
pub use memory_pool::{Call, MemoryPool};
pub use recording_switch::{PortCall, RecordingSwitch, ResetCall};
pub use verification::*;
