//! Message routing.
//!
//! The session loop decodes a frame once and hands it here together with the
//! sender's identity; the router resolves targets through the registry and
//! enqueues onto their outbound queues without awaiting.

pub mod router;

pub use router::{run_roster_publisher, MessageRouter, RouteCtx, Routed};
