//! WebSocket handler.
//!
//! One task per channel owns the socket, the outbound queue, the connect
//! deadline and the ping timer; they all end with the task. Registration,
//! routing and eviction go through the shared registry.

use std::time::Duration;

use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::Instrument;

use signcast_core::protocol::{is_clean_close, timestamp, CloseReason, Envelope};
use signcast_core::session::{SessionEvent, SessionMachine};

use crate::app_state::AppState;
use crate::dispatch::{RouteCtx, Routed};
use crate::realtime::types::close_message;
use crate::realtime::{ConnectionHandle, ConnectionId, Identity, Outbound};
use crate::transport::codec::{classify, Inbound};

/// How long a closing session waits for the peer's close reply.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

// --------------------
// Entry
// --------------------
pub async fn ws_upgrade(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let connection_id = ConnectionId::new();
    let span = tracing::info_span!(
        "session",
        %connection_id,
        client_id = tracing::field::Empty,
        role = tracing::field::Empty,
    );
    ws.on_upgrade(move |socket| run_session(app, connection_id, socket).instrument(span))
}

// --------------------
// Session-local state
// --------------------
struct Session {
    app: AppState,
    connection_id: ConnectionId,
    handle: ConnectionHandle,
    machine: SessionMachine,
    identity: Option<Identity>,
}

impl Session {
    fn on_envelope(&mut self, env: Envelope, raw: &str) -> Routed {
        if let Err(e) = self.machine.apply(SessionEvent::EnvelopeExchanged) {
            tracing::debug!(error = %e, "envelope after close started");
            return Routed::Dropped;
        }
        let ctx = RouteCtx {
            connection_id: self.connection_id,
            identity: self.identity.as_ref(),
            reply: &self.handle,
        };
        self.app.router().route(&ctx, env, raw)
    }

    /// Authorize, acknowledge, register. `Err` closes the channel.
    async fn identify(&mut self, identity: Identity) -> Result<(), CloseReason> {
        if !self.machine.awaiting_identification() {
            tracing::warn!(
                claimed = %identity.client_id,
                "repeated identification on an active channel; ignored"
            );
            return Ok(());
        }

        self.app.authorize(&identity).await?;

        // Enqueue the acknowledgement before registering so it precedes any
        // roster push triggered by the registration.
        self.handle.send_envelope(&Envelope::ConnectionEstablished {
            client_id: Some(identity.client_id.clone()),
            role: Some(identity.role),
            timestamp: Some(timestamp()),
        });
        let displaced = self.app.registry().register(
            self.connection_id,
            identity.clone(),
            self.handle.clone(),
        );
        if let Err(e) = self.machine.apply(SessionEvent::Identified) {
            tracing::error!(error = %e, "session state out of sync after identification");
        }

        let span = tracing::Span::current();
        span.record("client_id", tracing::field::display(&identity.client_id));
        span.record("role", identity.role.as_str());
        tracing::info!(
            replaced = displaced.is_some(),
            headquarters_id = ?identity.headquarters_id,
            "identified"
        );
        self.identity = Some(identity);
        Ok(())
    }
}

// --------------------
// Core session loop
// --------------------
async fn run_session(app: AppState, connection_id: ConnectionId, socket: WebSocket) {
    let gw = app.cfg().gateway.clone();

    // ---- outbound queue; the closer also fires on process shutdown
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(gw.outbound_queue);
    let closer = app.shutdown_token().child_token();
    let handle = ConnectionHandle::new(out_tx, closer.clone());

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut sess = Session {
        app: app.clone(),
        connection_id,
        handle,
        machine: SessionMachine::new(),
        identity: None,
    };

    // ---- timers (owned by this task)
    let connect_deadline = time::sleep(gw.connect_timeout());
    tokio::pin!(connect_deadline);
    let mut ping_tick = time::interval(gw.heartbeat_check_interval());
    ping_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping_tick.tick().await;

    tracing::debug!("channel open");

    let reason = loop {
        tokio::select! {
            () = closer.cancelled() => {
                if let Some(reason) = sess.handle.forced_reason() {
                    break reason;
                }
                break if app.is_draining() {
                    CloseReason::Shutdown
                } else {
                    CloseReason::Internal("outbound queue saturated".into())
                };
            }

            // outbound writer
            maybe_out = out_rx.recv() => {
                match maybe_out {
                    Some(Outbound::Close(reason)) => break reason,
                    Some(out) => {
                        if ws_tx.send(out.to_ws_message()).await.is_err() {
                            break CloseReason::Transport;
                        }
                    }
                    None => break CloseReason::Internal("outbound queue closed".into()),
                }
            }

            // connect deadline (only while identifying)
            () = &mut connect_deadline, if sess.machine.awaiting_identification() => {
                tracing::info!("no identification before deadline");
                break CloseReason::ConnectTimeout;
            }

            // transport keepalive
            _ = ping_tick.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break CloseReason::Transport;
                }
            }

            // inbound reader
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else {
                    break CloseReason::Transport;
                };

                let inbound = match classify(msg, gw.max_frame_bytes) {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        tracing::warn!(error = %e, "frame dropped");
                        continue;
                    }
                };

                match inbound {
                    Inbound::Text { env, raw } => {
                        match sess.on_envelope(env, &raw) {
                            Routed::Handled | Routed::Dropped => {}
                            Routed::Disconnect => break CloseReason::PeerRequested,
                            Routed::Identify(identity) => {
                                if let Err(reason) = sess.identify(identity).await {
                                    break reason;
                                }
                            }
                        }
                    }
                    Inbound::Pong => {
                        app.registry().touch_connection(&connection_id);
                    }
                    Inbound::Close(code) => {
                        tracing::debug!(?code, "peer closed");
                        break if is_clean_close(code) {
                            CloseReason::PeerRequested
                        } else {
                            CloseReason::Transport
                        };
                    }
                    Inbound::Ignored => {}
                }
            }
        }
    };

    // ---- close (best effort)
    let _ = sess.machine.apply(SessionEvent::CloseStarted(reason.clone()));
    if let CloseReason::Rejected(why) = &reason {
        tracing::info!(reason = %why, "identity rejected");
        let rejected = Envelope::ConnectionRejected {
            reason: why.clone(),
            timestamp: Some(timestamp()),
        };
        if let Ok(out) = Outbound::envelope(&rejected) {
            let _ = ws_tx.send(out.to_ws_message()).await;
        }
    }
    let code = match reason {
        CloseReason::Transport => None,
        ref r => {
            let _ = ws_tx.send(close_message(r)).await;
            Some(r.code())
        }
    };

    let removed = app.registry().remove(&connection_id).is_some();
    app.router().forget(&connection_id, sess.identity.as_ref());

    // Let the peer read the close frame and answer it before the socket drops.
    if code.is_some() {
        let drained = time::timeout(CLOSE_LINGER, async {
            while let Some(Ok(msg)) = ws_rx.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::debug!("peer did not answer close frame");
        }
    }
    let _ = ws_tx.close().await;
    let _ = sess.machine.apply(SessionEvent::ChannelClosed { code });

    tracing::info!(
        code = reason.code(),
        reason = reason.as_str(),
        removed,
        "session closed"
    );
}
