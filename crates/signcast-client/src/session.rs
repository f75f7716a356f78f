//! Channel client.
//!
//! One runner task per client dials, identifies, keeps the channel alive and
//! reconnects. Every timer it starts (connect deadline, heartbeat, backoff
//! delay) lives inside that task, so stopping the task stops them all.

use std::sync::Arc;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use signcast_core::error::{Result, SigncastError};
use signcast_core::protocol::{close, decode, timestamp, ClientId, CloseReason, Envelope, Role};
use signcast_core::session::{SessionEvent, SessionMachine};

use crate::backoff::{Decision, ReconnectController};
use crate::config::ClientConfig;
use crate::handler::EnvelopeHandler;
use crate::status::ConnectionStatus;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOX: usize = 64;
const INBOX: usize = 256;

/// Cloneable control surface of a running client.
#[derive(Clone)]
pub struct ClientHandle {
    client_id: ClientId,
    outbox: mpsc::Sender<Envelope>,
    status: watch::Receiver<ConnectionStatus>,
    retry: Arc<Notify>,
    cancel: CancellationToken,
}

impl ClientHandle {
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Queue an envelope. Fails unless the channel is connected; nothing is
    /// buffered across reconnects.
    pub fn send(&self, env: Envelope) -> Result<()> {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(SigncastError::NotConnected(format!("channel is {}", status.label())));
        }
        self.outbox
            .try_send(env)
            .map_err(|e| SigncastError::Channel(format!("outbox unavailable: {e}")))
    }

    /// Skip the remaining backoff delay, or leave `offline`.
    ///
    /// No effect while connecting or connected.
    pub fn retry(&self) {
        if matches!(
            self.status(),
            ConnectionStatus::Offline | ConnectionStatus::Reconnecting { .. }
        ) {
            self.retry.notify_one();
        }
    }

    /// Send `client_disconnect`, close with 1000 and stop reconnecting.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }

    /// Resolve once the client stopped for good.
    pub async fn stopped(&self) -> ConnectionStatus {
        let mut rx = self.status.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }

    /// Resolve once `pred` holds for the status.
    pub async fn wait_for(&self, pred: impl Fn(&ConnectionStatus) -> bool) -> ConnectionStatus {
        let mut rx = self.status.clone();
        loop {
            let current = rx.borrow_and_update().clone();
            if pred(&current) || current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

/// How one channel instance ended.
#[derive(Debug)]
enum Outcome {
    /// Channel closed; `None` when no close frame was seen.
    Closed(Option<u16>),
    Rejected(String),
    /// Local disconnect.
    Stopped,
}

pub struct ChannelClient {
    cfg: ClientConfig,
    handler: Arc<dyn EnvelopeHandler>,
}

impl ChannelClient {
    pub fn new(cfg: ClientConfig, handler: Arc<dyn EnvelopeHandler>) -> Self {
        Self { cfg, handler }
    }

    /// Start the runner and the handler task.
    pub fn spawn(self) -> (ClientHandle, JoinHandle<()>) {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let handle = ClientHandle {
            client_id: self.cfg.client_id.clone(),
            outbox: outbox_tx,
            status: status_rx,
            retry: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
        };

        tokio::spawn(run_handler(Arc::clone(&self.handler), inbox_rx, handle.clone()));

        let runner = Runner {
            controller: ReconnectController::new(self.cfg.reconnect.policy()),
            cfg: self.cfg,
            status: status_tx,
            outbox: outbox_rx,
            inbox: inbox_tx,
            retry: Arc::clone(&handle.retry),
            cancel: handle.cancel.clone(),
        };
        let task = tokio::spawn(runner.run());
        (handle, task)
    }
}

async fn run_handler(
    handler: Arc<dyn EnvelopeHandler>,
    mut inbox: mpsc::Receiver<Envelope>,
    client: ClientHandle,
) {
    while let Some(env) = inbox.recv().await {
        handler.handle(env, &client).await;
    }
}

struct Runner {
    cfg: ClientConfig,
    controller: ReconnectController,
    status: watch::Sender<ConnectionStatus>,
    outbox: mpsc::Receiver<Envelope>,
    inbox: mpsc::Sender<Envelope>,
    retry: Arc<Notify>,
    cancel: CancellationToken,
}

impl Runner {
    fn set_status(&self, status: ConnectionStatus) {
        tracing::info!(client_id = %self.cfg.client_id, status = %status, "connection status");
        self.status.send_replace(status);
    }

    async fn run(mut self) {
        let mut machine = SessionMachine::new();
        loop {
            self.set_status(ConnectionStatus::Connecting);
            let outcome = self.connect_once(&mut machine).await;
            tracing::debug!(?outcome, state = machine.state().as_str(), "channel ended");
            self.discard_stale_retry();

            let code = match outcome {
                Outcome::Stopped => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                Outcome::Rejected(reason) => {
                    self.set_status(ConnectionStatus::Rejected { reason });
                    return;
                }
                Outcome::Closed(code) => code,
            };

            match self.controller.on_close(code) {
                Decision::Stop => {
                    self.set_status(ConnectionStatus::Disconnected);
                    return;
                }
                Decision::Retry { attempt, delay } => {
                    if let Err(e) = machine.apply(SessionEvent::RetryScheduled) {
                        tracing::debug!(error = %e, "retry from unexpected state");
                    }
                    self.set_status(ConnectionStatus::Reconnecting { attempt, delay });
                    tokio::select! {
                        () = time::sleep(delay) => {}
                        () = self.retry.notified() => {
                            tracing::info!("manual retry; skipping backoff");
                        }
                        () = self.cancel.cancelled() => {
                            self.set_status(ConnectionStatus::Disconnected);
                            return;
                        }
                    }
                    if machine.apply(SessionEvent::Redial).is_err() {
                        machine = SessionMachine::new();
                    }
                }
                Decision::Offline => {
                    self.set_status(ConnectionStatus::Offline);
                    tokio::select! {
                        () = self.retry.notified() => {
                            tracing::info!("manual retry from offline");
                            self.controller.manual_retry();
                            machine = SessionMachine::new();
                        }
                        () = self.cancel.cancelled() => {
                            self.set_status(ConnectionStatus::Disconnected);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Drops a permit left by a `retry()` that raced the last redial.
    fn discard_stale_retry(&self) {
        if self.retry.notified().now_or_never().is_some() {
            tracing::debug!("stale manual retry discarded");
        }
    }

    fn identification(&self) -> Envelope {
        match self.cfg.role {
            Role::Display => Envelope::ClientConnect {
                client_id: self.cfg.client_id.clone(),
                headquarters_id: self.cfg.headquarters_id.clone(),
                timestamp: Some(timestamp()),
            },
            Role::Admin => Envelope::AdminConnect {
                client_id: Some(self.cfg.client_id.clone()),
                role: Some(Role::Admin.as_str().to_string()),
                timestamp: Some(timestamp()),
            },
        }
    }

    /// Dial, identify, and wait for `connection_established`.
    async fn open(&self, machine: &mut SessionMachine) -> std::result::Result<WsStream, Outcome> {
        let (mut ws, _) = connect_async(self.cfg.url.as_str()).await.map_err(|e| {
            tracing::warn!(url = %self.cfg.url, error = %e, "dial failed");
            Outcome::Closed(None)
        })?;

        let hello = self
            .identification()
            .to_json()
            .map_err(|_| Outcome::Closed(None))?;
        ws.send(Message::Text(hello)).await.map_err(|_| Outcome::Closed(None))?;
        let _ = machine.apply(SessionEvent::EnvelopeExchanged);

        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match decode(&text) {
                    Ok(Envelope::ConnectionEstablished { .. }) => return Ok(ws),
                    Ok(Envelope::ConnectionRejected { reason, .. }) => {
                        return Err(Outcome::Rejected(reason))
                    }
                    Ok(other) => {
                        tracing::debug!(kind = other.kind(), "envelope before acknowledgement ignored")
                    }
                    Err(e) => tracing::warn!(error = %e, "malformed envelope"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Err(Outcome::Closed(frame.map(|f| u16::from(f.code))))
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return Err(Outcome::Closed(None)),
            }
        }
    }

    async fn connect_once(&mut self, machine: &mut SessionMachine) -> Outcome {
        let opened = tokio::select! {
            r = time::timeout(self.cfg.connect_timeout(), self.open(machine)) => r,
            () = self.cancel.cancelled() => return Outcome::Stopped,
        };
        let mut ws = match opened {
            Ok(Ok(ws)) => ws,
            Ok(Err(outcome)) => {
                let code = match &outcome {
                    Outcome::Closed(code) => *code,
                    _ => Some(close::POLICY),
                };
                let _ = machine.apply(SessionEvent::ChannelClosed { code });
                return outcome;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.cfg.connect_timeout_ms,
                    "no acknowledgement before connect deadline"
                );
                let _ = machine.apply(SessionEvent::CloseStarted(CloseReason::ConnectTimeout));
                let _ = machine.apply(SessionEvent::ChannelClosed { code: None });
                return Outcome::Closed(None);
            }
        };

        let _ = machine.apply(SessionEvent::Identified);
        self.controller.on_open();
        // Drop anything queued for a previous channel.
        while self.outbox.try_recv().is_ok() {}
        self.set_status(ConnectionStatus::Connected);

        let outcome = self.pump(&mut ws).await;
        let code = match &outcome {
            Outcome::Closed(code) => *code,
            Outcome::Stopped => Some(close::NORMAL),
            Outcome::Rejected(_) => Some(close::POLICY),
        };
        let _ = machine.apply(SessionEvent::ChannelClosed { code });
        outcome
    }

    /// Active-channel loop.
    async fn pump(&mut self, ws: &mut WsStream) -> Outcome {
        let mut heartbeat = time::interval(self.cfg.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.close_cleanly(ws).await;
                    return Outcome::Stopped;
                }

                _ = heartbeat.tick() => {
                    let beat = Envelope::Heartbeat {
                        client_id: Some(self.cfg.client_id.clone()),
                        timestamp: Some(timestamp()),
                    };
                    if send_envelope(ws, &beat).await.is_err() {
                        return Outcome::Closed(None);
                    }
                }

                Some(env) = self.outbox.recv() => {
                    if send_envelope(ws, &env).await.is_err() {
                        return Outcome::Closed(None);
                    }
                }

                incoming = ws.next() => match incoming {
                    Some(Ok(Message::Text(text))) => match decode(&text) {
                        Ok(Envelope::HeartbeatResponse { .. }) => {
                            tracing::trace!("heartbeat acknowledged");
                        }
                        Ok(Envelope::ConnectionRejected { reason, .. }) => {
                            return Outcome::Rejected(reason);
                        }
                        Ok(Envelope::Unknown) => {
                            tracing::debug!("unrecognized envelope dropped");
                        }
                        Ok(env) => {
                            if self.inbox.send(env).await.is_err() {
                                tracing::warn!("handler task gone");
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "malformed envelope"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code));
                        tracing::info!(?code, reason = frame.as_ref().map(|f| f.reason.to_string()), "server closed channel");
                        return Outcome::Closed(code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "channel error");
                        return Outcome::Closed(None);
                    }
                    None => return Outcome::Closed(None),
                },
            }
        }
    }

    async fn close_cleanly(&self, ws: &mut WsStream) {
        let bye = Envelope::ClientDisconnect {
            client_id: Some(self.cfg.client_id.clone()),
            timestamp: Some(timestamp()),
        };
        let _ = send_envelope(ws, &bye).await;
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: CloseReason::PeerRequested.as_str().to_string().into(),
            }))
            .await;
        // Let the closing handshake finish, briefly.
        let _ = time::timeout(std::time::Duration::from_millis(500), async {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
    }
}

async fn send_envelope(ws: &mut WsStream, env: &Envelope) -> Result<()> {
    let text = env.to_json()?;
    ws.send(Message::Text(text))
        .await
        .map_err(|e| SigncastError::Channel(format!("send failed: {e}")))
}
