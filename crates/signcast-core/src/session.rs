//! Per-channel session state machine.
//!
//! ```text
//! connecting -> identifying -> active -> closing -> closed
//!      \____________\______________\________/        |
//!                                            (abnormal close)
//!                                                     v
//!                              connecting <- reconnecting
//! ```
//!
//! The machine is pure: it owns no timers or sockets. The gateway session
//! task and the client runner drive it and own the timers whose lifetime it
//! describes, so dropping the task cancels them.

use serde::Serialize;
use thiserror::Error;

use crate::protocol::close::{is_clean_close, CloseReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Channel open, nothing exchanged yet.
    Connecting,
    /// Waiting for the identification envelope (server) or its
    /// acknowledgement (client).
    Identifying,
    /// Identified and registered.
    Active,
    /// Close initiated; pending sends are best effort.
    Closing,
    /// Terminal for this channel instance.
    Closed,
    /// Waiting out a backoff delay before dialing again.
    Reconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Identifying => "identifying",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An envelope crossed the channel (either direction).
    EnvelopeExchanged,
    /// Identification succeeded.
    Identified,
    /// Close initiated locally or on the peer's request.
    CloseStarted(CloseReason),
    /// Channel ended; `None` when no close frame was seen.
    ChannelClosed { code: Option<u16> },
    /// Backoff delay scheduled after an abnormal close.
    RetryScheduled,
    /// Fresh channel being dialed after backoff.
    Redial,
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::EnvelopeExchanged => "envelope_exchanged",
            SessionEvent::Identified => "identified",
            SessionEvent::CloseStarted(_) => "close_started",
            SessionEvent::ChannelClosed { .. } => "channel_closed",
            SessionEvent::RetryScheduled => "retry_scheduled",
            SessionEvent::Redial => "redial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session transition: {event} while {}", .from.as_str())]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: &'static str,
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    state: SessionState,
    close_reason: Option<CloseReason>,
    close_code: Option<u16>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Connecting,
            close_reason: None,
            close_code: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// True while the connect deadline applies.
    pub fn awaiting_identification(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connecting | SessionState::Identifying
        )
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// `Some(clean)` once the channel has closed.
    pub fn closed_cleanly(&self) -> Option<bool> {
        match self.state {
            SessionState::Closed => Some(is_clean_close(self.close_code)),
            _ => None,
        }
    }

    /// Apply an event, returning the new state.
    ///
    /// Invalid transitions leave the machine untouched.
    pub fn apply(&mut self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        use SessionState::*;

        let next = match (self.state, &event) {
            (Connecting, SessionEvent::EnvelopeExchanged) => Identifying,
            (Identifying | Active, SessionEvent::EnvelopeExchanged) => self.state,
            (Connecting | Identifying, SessionEvent::Identified) => Active,
            (Connecting | Identifying | Active, SessionEvent::CloseStarted(reason)) => {
                self.close_reason = Some(reason.clone());
                Closing
            }
            // First reason wins.
            (Closing, SessionEvent::CloseStarted(_)) => Closing,
            (Connecting | Identifying | Active | Closing, SessionEvent::ChannelClosed { code }) => {
                self.close_code = *code;
                if self.close_reason.is_none() {
                    self.close_reason = Some(if is_clean_close(*code) {
                        CloseReason::PeerRequested
                    } else {
                        CloseReason::Transport
                    });
                }
                Closed
            }
            (Closed, SessionEvent::RetryScheduled) if !is_clean_close(self.close_code) => Reconnecting,
            (Reconnecting, SessionEvent::Redial) => {
                self.close_reason = None;
                self.close_code = None;
                Connecting
            }
            (from, ev) => {
                return Err(InvalidTransition {
                    from,
                    event: ev.name(),
                })
            }
        };

        self.state = next;
        Ok(next)
    }
}
