//! Close-code policy.
//!
//! 1000/1001 are "clean": the peer meant to go away and must not be chased
//! with reconnects. Everything else, including a missing close frame, is
//! abnormal and hands control to the client's reconnection controller.

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// Endpoint going away (shutdown, navigation).
pub const GOING_AWAY: u16 = 1001;
/// No close frame was received (transport dropped).
pub const ABNORMAL: u16 = 1006;
/// Policy violation (identity refused).
pub const POLICY: u16 = 1008;
/// Server-side failure.
pub const INTERNAL: u16 = 1011;
/// No identification within the connect deadline.
pub const CONNECT_TIMEOUT: u16 = 4000;
/// Heartbeat staleness eviction.
pub const HEARTBEAT_TIMEOUT: u16 = 4001;

/// Returns true when `code` signals an intentional shutdown.
///
/// `None` means the channel ended without a close frame.
pub fn is_clean_close(code: Option<u16>) -> bool {
    matches!(code, Some(NORMAL) | Some(GOING_AWAY))
}

/// Why a channel was (or is being) closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent `client_disconnect` or a clean close frame.
    PeerRequested,
    /// A newer channel identified with the same `client_id`.
    Replaced,
    /// Identification did not complete in time.
    ConnectTimeout,
    /// Heartbeat monitor found the connection stale.
    HeartbeatTimeout,
    /// Authorization collaborator refused the identity.
    Rejected(String),
    /// Process shutdown.
    Shutdown,
    /// Internal failure (collaborator unavailable, queue closed).
    Internal(String),
    /// Transport ended without a clean close.
    Transport,
}

impl CloseReason {
    /// Close code sent on the wire for this reason.
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::PeerRequested | CloseReason::Replaced => NORMAL,
            CloseReason::Shutdown => GOING_AWAY,
            CloseReason::Rejected(_) => POLICY,
            CloseReason::Internal(_) => INTERNAL,
            CloseReason::ConnectTimeout => CONNECT_TIMEOUT,
            CloseReason::HeartbeatTimeout => HEARTBEAT_TIMEOUT,
            CloseReason::Transport => ABNORMAL,
        }
    }

    /// Short machine-readable reason carried in the close frame.
    pub fn as_str(&self) -> &str {
        match self {
            CloseReason::PeerRequested => "client_disconnect",
            CloseReason::Replaced => "replaced",
            CloseReason::ConnectTimeout => "connect_timeout",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::Rejected(_) => "connection_rejected",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Internal(_) => "internal_error",
            CloseReason::Transport => "transport_closed",
        }
    }
}
