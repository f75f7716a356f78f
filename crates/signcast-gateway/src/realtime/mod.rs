//! Realtime runtime for the gateway.
//!
//! Connection registry (the only shared mutable state), heartbeat-based
//! eviction, and the outbound message types sessions drain.

pub mod core;
pub mod types;

pub use self::core::{run_heartbeat_monitor, Connection, ConnectionRegistry, RegistryEvent};
pub use types::{ConnectionHandle, ConnectionId, Identity, Outbound};
