//! Top-level facade crate for signcast.
//!
//! Re-exports the protocol core, the gateway library and the client library
//! so users can depend on a single crate.

pub mod core {
    pub use signcast_core::*;
}

pub mod gateway {
    pub use signcast_gateway::*;
}

pub mod client {
    pub use signcast_client::*;
}
