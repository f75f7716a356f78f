//! Frame classification for the session loop.
//!
//! - Text frames => decoded `Envelope` plus the raw text (forwarded verbatim)
//! - Oversized text and binary frames are dropped before any parsing
//! - Pong/Close are surfaced for liveness and lifecycle

use axum::extract::ws::Message;

use signcast_core::error::{Result, SigncastError};
use signcast_core::protocol::{decode, Envelope};

#[derive(Debug)]
pub enum Inbound {
    Text { env: Envelope, raw: String },
    Pong,
    /// Peer close; `None` when the frame carried no code.
    Close(Option<u16>),
    /// Nothing for the session to do (ping, binary).
    Ignored,
}

pub fn classify(msg: Message, max_frame_bytes: usize) -> Result<Inbound> {
    match msg {
        Message::Text(raw) => {
            if raw.len() > max_frame_bytes {
                return Err(SigncastError::BadRequest(format!(
                    "frame of {} bytes exceeds limit {max_frame_bytes}",
                    raw.len()
                )));
            }
            let env = decode(&raw)?;
            Ok(Inbound::Text { env, raw })
        }
        Message::Binary(b) => {
            tracing::debug!(bytes = b.len(), "binary frame ignored");
            Ok(Inbound::Ignored)
        }
        // Pings are answered by the WebSocket layer itself.
        Message::Ping(_) => Ok(Inbound::Ignored),
        Message::Pong(_) => Ok(Inbound::Pong),
        Message::Close(frame) => Ok(Inbound::Close(frame.map(|f| f.code))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use axum::extract::ws::CloseFrame;
    use std::borrow::Cow;

    #[test]
    fn oversized_text_is_rejected_before_decode() {
        let raw = format!(r#"{{"type":"text_message","message":"{}"}}"#, "x".repeat(64));
        let err = classify(Message::Text(raw), 32).unwrap_err();
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
    }

    #[test]
    fn text_keeps_raw_frame() {
        let raw = r#"{"type":"heartbeat","client_id":1}"#.to_string();
        match classify(Message::Text(raw.clone()), 1024).unwrap() {
            Inbound::Text { env, raw: kept } => {
                assert_eq!(env.kind(), "heartbeat");
                assert_eq!(kept, raw);
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }

    #[test]
    fn close_code_is_surfaced() {
        let frame = CloseFrame { code: 1001, reason: Cow::Borrowed("bye") };
        assert!(matches!(
            classify(Message::Close(Some(frame)), 1024).unwrap(),
            Inbound::Close(Some(1001))
        ));
        assert!(matches!(classify(Message::Close(None), 1024).unwrap(), Inbound::Close(None)));
    }
}
