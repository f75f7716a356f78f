//! Realtime core components: registry and heartbeat monitor.

mod heartbeat;
mod registry;

pub use heartbeat::run_heartbeat_monitor;
pub use registry::{Connection, ConnectionRegistry, RegistryEvent};
