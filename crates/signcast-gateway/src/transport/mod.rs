//! Transport layer (WebSocket).
//!
//! Exposes the WS upgrade handler and the frame codec that classifies
//! messages once before they reach the session loop and router.

pub mod codec;
pub mod ws;
