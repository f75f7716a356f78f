use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use signcast_core::protocol::{timestamp, ClientId, ContentId, Envelope, HeadquartersId, Role};

use crate::realtime::{
    Connection, ConnectionHandle, ConnectionId, ConnectionRegistry, Identity, Outbound,
    RegistryEvent,
};

/// Per-frame routing context.
pub struct RouteCtx<'a> {
    pub connection_id: ConnectionId,
    /// `None` until identification succeeded.
    pub identity: Option<&'a Identity>,
    /// Sender's own outbound queue (replies, failure notices).
    pub reply: &'a ConnectionHandle,
}

/// What the session loop must do after routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Handled,
    Dropped,
    /// Identification envelope; the session authorizes and registers.
    Identify(Identity),
    /// Peer asked for a clean close.
    Disconnect,
}

/// Classifies envelopes and forwards them among registered connections.
///
/// Keeps the acknowledgement table: which admin issued the last
/// `broadcast_content` for a `(content_id, display)` pair.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    pending: DashMap<(ContentId, ClientId), ConnectionId>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            pending: DashMap::new(),
        }
    }

    /// Number of broadcasts still waiting for an acknowledgement.
    pub fn pending_acks(&self) -> usize {
        self.pending.len()
    }

    /// Route one decoded envelope. `raw` is the frame as received, forwarded unchanged.
    pub fn route(&self, ctx: &RouteCtx<'_>, env: Envelope, raw: &str) -> Routed {
        if env.is_identification() {
            return identify(ctx.connection_id, env);
        }

        let Some(sender) = ctx.identity else {
            tracing::warn!(kind = env.kind(), "envelope before identification; dropped");
            return Routed::Dropped;
        };

        match env {
            Envelope::Heartbeat { .. } => {
                if !self.registry.touch_connection(&ctx.connection_id) {
                    self.registry.touch(&sender.client_id);
                }
                tracing::trace!(client_id = %sender.client_id, "heartbeat");
                ctx.reply.send_envelope(&Envelope::HeartbeatResponse {
                    timestamp: Some(timestamp()),
                });
                Routed::Handled
            }

            Envelope::BroadcastContent {
                content_id,
                client_id,
                headquarters_id,
                ..
            } => {
                if !require_role(sender, Role::Admin, "broadcast_content") {
                    return Routed::Dropped;
                }
                self.broadcast(ctx, content_id, client_id, headquarters_id, raw);
                Routed::Handled
            }

            Envelope::BroadcastReceived {
                content_id,
                client_id,
                ..
            }
            | Envelope::BroadcastError {
                content_id,
                client_id,
                ..
            } => {
                if !require_role(sender, Role::Display, "acknowledgement") {
                    return Routed::Dropped;
                }
                let display_id = client_id.unwrap_or_else(|| sender.client_id.clone());
                self.acknowledge(content_id, display_id, raw);
                Routed::Handled
            }

            Envelope::TextMessage { client_id, .. } => {
                self.push(ctx, sender, "text_message", client_id, raw)
            }
            Envelope::ContentUpdate { client_id, .. } => {
                self.push(ctx, sender, "content_update", client_id, raw)
            }
            Envelope::StatusUpdate { client_id, .. } => {
                self.push(ctx, sender, "status_update", client_id, raw)
            }

            Envelope::ClientDisconnect { .. } => {
                tracing::info!(client_id = %sender.client_id, "client requested disconnect");
                Routed::Disconnect
            }

            Envelope::Unknown => {
                tracing::debug!(client_id = %sender.client_id, "unrecognized envelope dropped");
                Routed::Dropped
            }

            other => {
                tracing::warn!(
                    client_id = %sender.client_id,
                    kind = other.kind(),
                    "server-originated envelope received from peer; dropped"
                );
                Routed::Dropped
            }
        }
    }

    fn broadcast(
        &self,
        ctx: &RouteCtx<'_>,
        content_id: ContentId,
        target: Option<ClientId>,
        site: Option<HeadquartersId>,
        raw: &str,
    ) {
        let targets: Vec<Connection> = match (&target, &site) {
            (Some(id), _) => self.registry.find_role(id, Role::Display).into_iter().collect(),
            (None, Some(hq)) => self
                .registry
                .list(Some(Role::Display))
                .into_iter()
                .filter(|c| c.headquarters_id.as_ref() == Some(hq))
                .collect(),
            (None, None) => self.registry.list(Some(Role::Display)),
        };

        if targets.is_empty() {
            let error = match (&target, &site) {
                (Some(_), _) => "client not connected".to_string(),
                (None, Some(hq)) => format!("no connected displays at headquarters {hq}"),
                (None, None) => "no connected displays".to_string(),
            };
            tracing::info!(%content_id, target = ?target, site = ?site, "broadcast has no targets");
            ctx.reply.send_envelope(&Envelope::BroadcastError {
                content_id,
                client_id: target,
                error,
                timestamp: Some(timestamp()),
            });
            return;
        }

        let frame = Outbound::verbatim(raw);
        let mut delivered = 0usize;
        for conn in &targets {
            if self.registry.deliver(&conn.connection_id, frame.clone()) {
                self.pending.insert(
                    (content_id.clone(), conn.client_id.clone()),
                    ctx.connection_id,
                );
                delivered += 1;
            } else {
                tracing::warn!(%content_id, client_id = %conn.client_id, "broadcast delivery failed");
                ctx.reply.send_envelope(&Envelope::BroadcastError {
                    content_id: content_id.clone(),
                    client_id: Some(conn.client_id.clone()),
                    error: "delivery failed".to_string(),
                    timestamp: Some(timestamp()),
                });
            }
        }
        tracing::info!(%content_id, targets = targets.len(), delivered, "broadcast forwarded");
    }

    fn acknowledge(&self, content_id: ContentId, display_id: ClientId, raw: &str) {
        let frame = Outbound::verbatim(raw);
        if let Some((_, admin)) = self.pending.remove(&(content_id.clone(), display_id.clone())) {
            if self.registry.deliver(&admin, frame.clone()) {
                tracing::debug!(%content_id, client_id = %display_id, "acknowledgement relayed");
                return;
            }
        }
        // Originator unknown or gone: surface it on every admin console.
        let admins = self.registry.list(Some(Role::Admin));
        for admin in &admins {
            self.registry.deliver(&admin.connection_id, frame.clone());
        }
        tracing::debug!(%content_id, client_id = %display_id, admins = admins.len(), "acknowledgement fanned out");
    }

    fn push(
        &self,
        ctx: &RouteCtx<'_>,
        sender: &Identity,
        kind: &'static str,
        target: Option<ClientId>,
        raw: &str,
    ) -> Routed {
        if !require_role(sender, Role::Admin, kind) {
            return Routed::Dropped;
        }

        let frame = Outbound::verbatim(raw);
        let delivered = match &target {
            Some(id) => self
                .registry
                .find_role(id, Role::Display)
                .map(|c| self.registry.deliver(&c.connection_id, frame))
                .unwrap_or(false),
            None => {
                let displays = self.registry.list(Some(Role::Display));
                displays
                    .iter()
                    .filter(|c| self.registry.deliver(&c.connection_id, frame.clone()))
                    .count()
                    > 0
            }
        };

        if !delivered {
            tracing::info!(kind, target = ?target, "direct message not delivered");
            ctx.reply.send_envelope(&Envelope::DeliveryFailed {
                client_id: target,
                reason: "client not connected".to_string(),
                timestamp: Some(timestamp()),
            });
        }
        Routed::Handled
    }

    /// Drop acknowledgement bookkeeping tied to a closed channel.
    ///
    /// An admin's outstanding broadcasts go, and so do broadcasts awaiting a
    /// display that no longer has a live entry. Call after the registry entry
    /// is removed.
    pub fn forget(&self, connection_id: &ConnectionId, identity: Option<&Identity>) {
        let gone_display = identity
            .filter(|id| id.role == Role::Display)
            .filter(|id| self.registry.find_role(&id.client_id, Role::Display).is_none())
            .map(|id| &id.client_id);
        self.pending.retain(|(_, display_id), admin| {
            admin != connection_id && Some(display_id) != gone_display
        });
    }

    /// Send the current roster to every admin.
    pub fn push_roster(&self) {
        let connections = self.registry.list(None);
        let roster = Envelope::ConnectionsList {
            connections: connections.iter().map(Connection::info).collect(),
        };
        let frame = match Outbound::envelope(&roster) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode roster");
                return;
            }
        };
        for admin in connections.iter().filter(|c| c.role == Role::Admin) {
            self.registry.deliver(&admin.connection_id, frame.clone());
        }
    }
}

fn identify(connection_id: ConnectionId, env: Envelope) -> Routed {
    match env {
        Envelope::ClientConnect {
            client_id,
            headquarters_id,
            ..
        } => {
            if client_id.is_blank() {
                tracing::warn!("client_connect with empty client_id; dropped");
                return Routed::Dropped;
            }
            Routed::Identify(Identity {
                client_id,
                role: Role::Display,
                headquarters_id,
            })
        }
        Envelope::AdminConnect { client_id, .. } => {
            let client_id = client_id
                .filter(|id| !id.is_blank())
                .unwrap_or_else(|| ClientId::new(format!("admin:{connection_id}")));
            Routed::Identify(Identity {
                client_id,
                role: Role::Admin,
                headquarters_id: None,
            })
        }
        _ => Routed::Dropped,
    }
}

fn require_role(sender: &Identity, role: Role, what: &str) -> bool {
    if sender.role == role {
        return true;
    }
    tracing::warn!(
        client_id = %sender.client_id,
        role = sender.role.as_str(),
        what,
        "envelope not permitted for role; dropped"
    );
    false
}

/// Push `connections_list` to admins whenever the registry changes.
pub async fn run_roster_publisher(
    router: Arc<MessageRouter>,
    mut events: broadcast::Receiver<RegistryEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            ev = events.recv() => match ev {
                Ok(ev) => {
                    tracing::trace!(?ev, "registry changed");
                    router.push_roster();
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "roster publisher lagged");
                    router.push_roster();
                }
                Err(RecvError::Closed) => return,
            },
            () = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use signcast_core::protocol::decode;
    use tokio::sync::mpsc;

    struct Peer {
        id: ConnectionId,
        identity: Identity,
        handle: ConnectionHandle,
        rx: mpsc::Receiver<Outbound>,
    }

    impl Peer {
        fn ctx(&self) -> RouteCtx<'_> {
            RouteCtx {
                connection_id: self.id,
                identity: Some(&self.identity),
                reply: &self.handle,
            }
        }

        fn next_text(&mut self) -> String {
            match self.rx.try_recv().unwrap() {
                Outbound::Text(s) => s.to_string(),
                other => panic!("expected text, got {other:?}"),
            }
        }

        fn next_envelope(&mut self) -> Envelope {
            decode(&self.next_text()).unwrap()
        }
    }

    fn join(reg: &Arc<ConnectionRegistry>, id: &str, role: Role, hq: Option<&str>) -> Peer {
        let (tx, rx) = mpsc::channel(16);
        let handle = ConnectionHandle::new(tx, CancellationToken::new());
        let identity = Identity {
            client_id: ClientId::from(id),
            role,
            headquarters_id: hq.map(HeadquartersId::from),
        };
        let conn_id = ConnectionId::new();
        reg.register(conn_id, identity.clone(), handle.clone());
        Peer { id: conn_id, identity, handle, rx }
    }

    fn route(router: &MessageRouter, peer: &Peer, raw: &str) -> Routed {
        router.route(&peer.ctx(), decode(raw).unwrap(), raw)
    }

    #[test]
    fn broadcast_and_ack_round_trip_to_originating_admin() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut admin = join(&reg, "console", Role::Admin, None);
        let mut other_admin = join(&reg, "console-2", Role::Admin, None);
        let mut display = join(&reg, "42", Role::Display, None);

        let bc = r#"{"type":"broadcast_content","content_id":7,"client_id":42,"timestamp":"t"}"#;
        assert_eq!(route(&router, &admin, bc), Routed::Handled);
        assert_eq!(display.next_text(), bc);
        assert_eq!(router.pending_acks(), 1);

        let ack = r#"{"type":"broadcast_received","content_id":7,"client_id":42,"status":"success","timestamp":"t2"}"#;
        assert_eq!(route(&router, &display, ack), Routed::Handled);
        assert_eq!(admin.next_text(), ack);
        assert!(other_admin.rx.try_recv().is_err());
        assert_eq!(router.pending_acks(), 0);
    }

    #[test]
    fn broadcast_to_absent_target_reports_error() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut admin = join(&reg, "console", Role::Admin, None);

        route(&router, &admin, r#"{"type":"broadcast_content","content_id":"9","client_id":"missing"}"#);
        match admin.next_envelope() {
            Envelope::BroadcastError { content_id, client_id, error, .. } => {
                assert_eq!(content_id.as_str(), "9");
                assert_eq!(client_id.unwrap().as_str(), "missing");
                assert!(!error.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn site_broadcast_reaches_only_that_site() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let admin = join(&reg, "console", Role::Admin, None);
        let mut north_a = join(&reg, "1", Role::Display, Some("north"));
        let mut north_b = join(&reg, "2", Role::Display, Some("north"));
        let mut south = join(&reg, "3", Role::Display, Some("south"));

        route(&router, &admin, r#"{"type":"broadcast_content","content_id":5,"headquarters_id":"north"}"#);
        assert!(north_a.rx.try_recv().is_ok());
        assert!(north_b.rx.try_recv().is_ok());
        assert!(south.rx.try_recv().is_err());
        assert_eq!(router.pending_acks(), 2);
    }

    #[test]
    fn untargeted_broadcast_reaches_every_display() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut admin = join(&reg, "console", Role::Admin, None);
        let mut a = join(&reg, "1", Role::Display, None);
        let mut b = join(&reg, "2", Role::Display, Some("x"));

        route(&router, &admin, r#"{"type":"broadcast_content","content_id":5}"#);
        assert!(a.rx.try_recv().is_ok());
        assert!(b.rx.try_recv().is_ok());
        assert!(admin.rx.try_recv().is_err());
    }

    #[test]
    fn ack_without_originator_fans_out_to_admins() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut a1 = join(&reg, "c1", Role::Admin, None);
        let mut a2 = join(&reg, "c2", Role::Admin, None);
        let display = join(&reg, "42", Role::Display, None);

        let err = r#"{"type":"broadcast_error","content_id":3,"error":"404"}"#;
        route(&router, &display, err);
        assert_eq!(a1.next_text(), err);
        assert_eq!(a2.next_text(), err);
    }

    #[test]
    fn text_message_to_absent_display_returns_delivery_failed() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut admin = join(&reg, "console", Role::Admin, None);

        route(&router, &admin, r#"{"type":"text_message","client_id":"ghost","message":"hi"}"#);
        assert!(matches!(admin.next_envelope(), Envelope::DeliveryFailed { .. }));
    }

    #[test]
    fn displays_cannot_originate_admin_traffic() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let rogue = join(&reg, "1", Role::Display, None);
        let mut victim = join(&reg, "2", Role::Display, None);

        let routed = route(&router, &rogue, r#"{"type":"text_message","client_id":"2","message":"x"}"#);
        assert_eq!(routed, Routed::Dropped);
        assert!(victim.rx.try_recv().is_err());
    }

    #[test]
    fn heartbeat_is_answered() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut display = join(&reg, "1", Role::Display, None);

        route(&router, &display, r#"{"type":"heartbeat","client_id":"1"}"#);
        assert!(matches!(display.next_envelope(), Envelope::HeartbeatResponse { .. }));
    }

    #[test]
    fn traffic_before_identification_is_dropped() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx, CancellationToken::new());
        let ctx = RouteCtx { connection_id: ConnectionId::new(), identity: None, reply: &handle };

        let raw = r#"{"type":"heartbeat"}"#;
        assert_eq!(router.route(&ctx, decode(raw).unwrap(), raw), Routed::Dropped);
        assert!(rx.try_recv().is_err());

        let raw = r#"{"type":"admin_connect","role":"admin"}"#;
        match router.route(&ctx, decode(raw).unwrap(), raw) {
            Routed::Identify(id) => {
                assert_eq!(id.role, Role::Admin);
                assert!(id.client_id.as_str().starts_with("admin:"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_client_id_is_not_an_identity() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(reg);
        let (tx, _rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(tx, CancellationToken::new());
        let ctx = RouteCtx { connection_id: ConnectionId::new(), identity: None, reply: &handle };
        let raw = r#"{"type":"client_connect","client_id":"  "}"#;
        assert_eq!(router.route(&ctx, decode(raw).unwrap(), raw), Routed::Dropped);
    }

    #[test]
    fn forget_drops_pending_for_closed_admin() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let admin = join(&reg, "console", Role::Admin, None);
        let _display = join(&reg, "42", Role::Display, None);

        route(&router, &admin, r#"{"type":"broadcast_content","content_id":1,"client_id":42}"#);
        assert_eq!(router.pending_acks(), 1);
        router.forget(&admin.id, Some(&admin.identity));
        assert_eq!(router.pending_acks(), 0);
    }

    #[test]
    fn forget_drops_pending_for_departed_display() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let admin = join(&reg, "console", Role::Admin, None);
        let display = join(&reg, "42", Role::Display, None);
        let _other = join(&reg, "43", Role::Display, None);

        for id in 0..50 {
            let bc = format!(r#"{{"type":"broadcast_content","content_id":{id},"client_id":42}}"#);
            route(&router, &admin, &bc);
        }
        route(&router, &admin, r#"{"type":"broadcast_content","content_id":1,"client_id":43}"#);
        assert_eq!(router.pending_acks(), 51);

        reg.remove(&display.id);
        router.forget(&display.id, Some(&display.identity));
        assert_eq!(router.pending_acks(), 1);
    }

    #[test]
    fn forget_keeps_pending_for_replacing_display() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let admin = join(&reg, "console", Role::Admin, None);
        let old = join(&reg, "42", Role::Display, None);
        let _new = join(&reg, "42", Role::Display, None);

        route(&router, &admin, r#"{"type":"broadcast_content","content_id":5,"client_id":42}"#);
        assert_eq!(router.pending_acks(), 1);

        // The displaced session ends after its replacement registered.
        reg.remove(&old.id);
        router.forget(&old.id, Some(&old.identity));
        assert_eq!(router.pending_acks(), 1);
    }

    #[test]
    fn roster_goes_to_admins_only() {
        let reg = Arc::new(ConnectionRegistry::new());
        let router = MessageRouter::new(Arc::clone(&reg));
        let mut admin = join(&reg, "console", Role::Admin, None);
        let mut display = join(&reg, "42", Role::Display, None);

        router.push_roster();
        match admin.next_envelope() {
            Envelope::ConnectionsList { connections } => assert_eq!(connections.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(display.rx.try_recv().is_err());
    }
}
