//! Shared error type across signcast crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed message.
    BadRequest,
    /// Identity refused by the authorization collaborator.
    NotAuthorized,
    /// Target (or the local channel) is not connected.
    NotConnected,
    /// A bounded wait elapsed.
    Timeout,
    /// Channel-level failure (socket, closed queue).
    Channel,
    /// An external collaborator (content API, client API) failed.
    Upstream,
    /// Unsupported config/protocol version.
    UnsupportedVersion,
    /// Internal error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::NotAuthorized => "NOT_AUTHORIZED",
            ClientCode::NotConnected => "NOT_CONNECTED",
            ClientCode::Timeout => "TIMEOUT",
            ClientCode::Channel => "CHANNEL",
            ClientCode::Upstream => "UPSTREAM",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, SigncastError>;

/// Unified error type used by core, gateway, and client.
#[derive(Debug, Error)]
pub enum SigncastError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl SigncastError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            SigncastError::BadRequest(_) => ClientCode::BadRequest,
            SigncastError::NotAuthorized(_) => ClientCode::NotAuthorized,
            SigncastError::NotConnected(_) => ClientCode::NotConnected,
            SigncastError::Timeout(_) => ClientCode::Timeout,
            SigncastError::Channel(_) => ClientCode::Channel,
            SigncastError::Upstream(_) => ClientCode::Upstream,
            SigncastError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            SigncastError::Internal(_) => ClientCode::Internal,
        }
    }
}
