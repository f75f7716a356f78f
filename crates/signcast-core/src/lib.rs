//! signcast core: transport-agnostic protocol primitives, error types, and the
//! per-channel session state machine.
//!
//! This crate defines the wire-level contracts shared by the gateway, the
//! client library, and test tooling. It carries no transport or runtime
//! dependencies so both ends of the channel can reuse it.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Malformed input is
//! reported as `SigncastError` (or decoded into `Envelope::Unknown`) so one
//! bad peer cannot take a process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod content;
pub mod error;
pub mod protocol;
pub mod session;

/// Shared result type.
pub use error::{Result, SigncastError};
