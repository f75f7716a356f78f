use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, OnceLock};

use axum::extract::ws::{CloseFrame, Message};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use signcast_core::error::Result;
use signcast_core::protocol::{ClientId, CloseReason, Envelope, HeadquartersId, Role};

/// Registry-assigned identifier of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity a channel claimed during identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub client_id: ClientId,
    pub role: Role,
    pub headquarters_id: Option<HeadquartersId>,
}

/// Item on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Serialized envelope; shared so a broadcast serializes once.
    Text(Arc<str>),
    /// Ask the session to close the channel.
    Close(CloseReason),
}

impl Outbound {
    pub fn envelope(env: &Envelope) -> Result<Self> {
        Ok(Outbound::Text(Arc::from(env.to_json()?)))
    }

    /// Forward a peer's frame byte-for-byte.
    pub fn verbatim(raw: &str) -> Self {
        Outbound::Text(Arc::from(raw))
    }

    pub fn to_ws_message(&self) -> Message {
        match self {
            Outbound::Text(s) => Message::Text(s.to_string()),
            Outbound::Close(reason) => close_message(reason),
        }
    }
}

pub fn close_message(reason: &CloseReason) -> Message {
    Message::Close(Some(CloseFrame {
        code: reason.code(),
        reason: Cow::Owned(reason.as_str().to_string()),
    }))
}

/// Sending side of a session, held by the registry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Outbound>,
    closer: CancellationToken,
    /// Set when a close had to bypass a full queue.
    forced: Arc<OnceLock<CloseReason>>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<Outbound>, closer: CancellationToken) -> Self {
        Self {
            tx,
            closer,
            forced: Arc::new(OnceLock::new()),
        }
    }

    /// Non-blocking enqueue; `false` when the queue is full or the session ended.
    pub fn try_send(&self, out: Outbound) -> bool {
        self.tx.try_send(out).is_ok()
    }

    pub fn send_envelope(&self, env: &Envelope) -> bool {
        match Outbound::envelope(env) {
            Ok(out) => self.try_send(out),
            Err(e) => {
                tracing::error!(error = %e, kind = env.kind(), "failed to encode envelope");
                false
            }
        }
    }

    /// Force the session to close.
    ///
    /// With a full queue the reason is parked on the handle and the session
    /// cancelled; the session reads it back through [`Self::forced_reason`].
    pub fn close(&self, reason: CloseReason) {
        if let Err(err) = self.tx.try_send(Outbound::Close(reason)) {
            if let Outbound::Close(reason) = err.into_inner() {
                let _ = self.forced.set(reason);
            }
            self.closer.cancel();
        }
    }

    /// First close reason that bypassed the queue, if any.
    pub fn forced_reason(&self) -> Option<CloseReason> {
        self.forced.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn close_on_full_queue_keeps_the_reason() {
        let (tx, _rx) = mpsc::channel(1);
        let closer = CancellationToken::new();
        let handle = ConnectionHandle::new(tx, closer.clone());
        assert!(handle.try_send(Outbound::verbatim("{}")));

        handle.close(CloseReason::Replaced);
        assert!(closer.is_cancelled());
        assert_eq!(handle.forced_reason(), Some(CloseReason::Replaced));

        // Later reasons do not overwrite the first.
        handle.close(CloseReason::HeartbeatTimeout);
        assert_eq!(handle.forced_reason(), Some(CloseReason::Replaced));
    }

    #[test]
    fn close_with_room_is_queued() {
        let (tx, mut rx) = mpsc::channel(1);
        let closer = CancellationToken::new();
        let handle = ConnectionHandle::new(tx, closer.clone());

        handle.close(CloseReason::HeartbeatTimeout);
        assert!(!closer.is_cancelled());
        assert_eq!(handle.forced_reason(), None);
        match rx.try_recv().unwrap() {
            Outbound::Close(reason) => assert_eq!(reason, CloseReason::HeartbeatTimeout),
            Outbound::Text(_) => unreachable!("expected close"),
        }
    }
}
