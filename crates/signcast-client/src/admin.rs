//! Admin-console helpers: envelope builders and a handler that turns roster
//! pushes and acknowledgements into events for a UI.

use async_trait::async_trait;
use tokio::sync::mpsc;

use signcast_core::content::ContentRef;
use signcast_core::protocol::{
    timestamp, ClientId, ConnectionInfo, ContentId, Envelope, HeadquartersId,
};

use crate::handler::EnvelopeHandler;
use crate::session::ClientHandle;

/// Who a broadcast goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Client(ClientId),
    Site(HeadquartersId),
    AllDisplays,
}

pub fn broadcast(content_id: impl Into<ContentId>, target: Target) -> Envelope {
    let (client_id, headquarters_id) = match target {
        Target::Client(id) => (Some(id), None),
        Target::Site(hq) => (None, Some(hq)),
        Target::AllDisplays => (None, None),
    };
    Envelope::BroadcastContent {
        content_id: content_id.into(),
        client_id,
        headquarters_id,
        content: None,
        timestamp: Some(timestamp()),
    }
}

/// Broadcast that carries the content record, sparing displays a lookup.
pub fn broadcast_inline(content: ContentRef, target: Target) -> Envelope {
    match broadcast(content.id.clone(), target) {
        Envelope::BroadcastContent {
            content_id,
            client_id,
            headquarters_id,
            timestamp,
            ..
        } => Envelope::BroadcastContent {
            content_id,
            client_id,
            headquarters_id,
            content: Some(content),
            timestamp,
        },
        other => other,
    }
}

pub fn text_message(client_id: Option<ClientId>, message: impl Into<String>) -> Envelope {
    Envelope::TextMessage {
        client_id,
        message: message.into(),
        timestamp: Some(timestamp()),
    }
}

pub fn content_update(client_id: Option<ClientId>, content: ContentRef) -> Envelope {
    Envelope::ContentUpdate {
        client_id,
        content,
        timestamp: Some(timestamp()),
    }
}

pub fn status_update(client_id: Option<ClientId>, status: impl Into<String>) -> Envelope {
    Envelope::StatusUpdate {
        client_id,
        status: status.into(),
        timestamp: Some(timestamp()),
    }
}

/// What an admin UI shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminEvent {
    Roster(Vec<ConnectionInfo>),
    Acknowledged {
        content_id: ContentId,
        client_id: Option<ClientId>,
    },
    Failed {
        content_id: ContentId,
        client_id: Option<ClientId>,
        error: String,
    },
    DeliveryFailed {
        client_id: Option<ClientId>,
        reason: String,
    },
}

pub struct AdminHandler {
    events: mpsc::Sender<AdminEvent>,
}

impl AdminHandler {
    pub fn new(events: mpsc::Sender<AdminEvent>) -> Self {
        Self { events }
    }
}

#[async_trait]
impl EnvelopeHandler for AdminHandler {
    async fn handle(&self, env: Envelope, _client: &ClientHandle) {
        let ev = match env {
            Envelope::ConnectionsList { connections } => AdminEvent::Roster(connections),
            Envelope::BroadcastReceived {
                content_id,
                client_id,
                ..
            } => AdminEvent::Acknowledged {
                content_id,
                client_id,
            },
            Envelope::BroadcastError {
                content_id,
                client_id,
                error,
                ..
            } => AdminEvent::Failed {
                content_id,
                client_id,
                error,
            },
            Envelope::DeliveryFailed { client_id, reason, .. } => {
                AdminEvent::DeliveryFailed { client_id, reason }
            }
            other => {
                tracing::debug!(kind = other.kind(), "ignored by admin");
                return;
            }
        };
        if self.events.send(ev).await.is_err() {
            tracing::debug!("admin event receiver dropped");
        }
    }
}
