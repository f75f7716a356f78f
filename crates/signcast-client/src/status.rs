//! Connection-status indicator.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Dialing or waiting for `connection_established`.
    Connecting,
    Connected,
    /// Waiting out a backoff delay.
    Reconnecting { attempt: u32, delay: Duration },
    /// Retry budget exhausted; only a manual retry dials again.
    Offline,
    /// Closed cleanly (local disconnect or a clean server close).
    Disconnected,
    /// Identity refused by the server.
    Rejected { reason: String },
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting { .. } => "reconnecting",
            ConnectionStatus::Offline => "offline",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Rejected { .. } => "rejected",
        }
    }

    /// The client task has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Disconnected | ConnectionStatus::Rejected { .. }
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {attempt}, in {}ms)", delay.as_millis())
            }
            ConnectionStatus::Rejected { reason } => write!(f, "rejected: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}
