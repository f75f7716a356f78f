//! signcast client library.
//!
//! A channel client that identifies as a display or an admin console, keeps
//! the channel alive with heartbeats, and reconnects with bounded
//! exponential backoff after abnormal closes. Role-specific behavior plugs in
//! through [`handler::EnvelopeHandler`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod admin;
pub mod backoff;
pub mod config;
pub mod display;
pub mod handler;
pub mod session;
pub mod status;

pub use backoff::{Decision, ReconnectController, ReconnectPolicy};
pub use config::ClientConfig;
pub use handler::EnvelopeHandler;
pub use session::{ChannelClient, ClientHandle};
pub use status::ConnectionStatus;
