//! Channel envelope (JSON text frames).
//!
//! Every frame is one JSON object with a `type` tag. Known tags map to a
//! variant of [`Envelope`]; any other tag becomes [`Envelope::Unknown`] so
//! the receiver can log and drop it instead of failing the channel.
//! Extra fields (e.g. `client_info`, `admin_info`) are ignored.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::content::ContentRef;
use crate::error::{Result, SigncastError};
use crate::protocol::ids::{ClientId, ContentId, HeadquartersId};

/// Role a peer identifies as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Display,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Display => "display",
            Role::Admin => "admin",
        }
    }
}

/// One row of the `connections_list` roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub client_id: ClientId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headquarters_id: Option<HeadquartersId>,
    pub connected_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
}

/// The closed message set of the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Display client identifies itself.
    ///
    /// The legacy `identification {clientId}` form decodes here too.
    #[serde(alias = "identification")]
    ClientConnect {
        #[serde(alias = "clientId")]
        client_id: ClientId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headquarters_id: Option<HeadquartersId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Admin console identifies itself.
    AdminConnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    HeartbeatResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Server acknowledgement after identification.
    #[serde(alias = "admin_connected")]
    ConnectionEstablished {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Identity refused; terminal for the client.
    ConnectionRejected {
        #[serde(default)]
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Roster pushed to admins whenever the registry changes.
    ConnectionsList { connections: Vec<ConnectionInfo> },
    BroadcastContent {
        content_id: ContentId,
        /// Target display; absent means "site" or "everyone".
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headquarters_id: Option<HeadquartersId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ContentRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    #[serde(alias = "broadcast_success")]
    BroadcastReceived {
        content_id: ContentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default = "default_status")]
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    BroadcastError {
        content_id: ContentId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default)]
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    TextMessage {
        /// Target display.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    ContentUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        content: ContentRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    StatusUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Explicit clean-close request.
    ClientDisconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    /// Routing failure notice for a direct message.
    DeliveryFailed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

fn default_status() -> String {
    "success".to_string()
}

/// ISO-8601 UTC timestamp with millisecond precision (`2024-05-01T12:00:00.000Z`).
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Envelope {
    /// Wire name of the variant (`"unknown"` for unrecognized tags).
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::ClientConnect { .. } => "client_connect",
            Envelope::AdminConnect { .. } => "admin_connect",
            Envelope::Heartbeat { .. } => "heartbeat",
            Envelope::HeartbeatResponse { .. } => "heartbeat_response",
            Envelope::ConnectionEstablished { .. } => "connection_established",
            Envelope::ConnectionRejected { .. } => "connection_rejected",
            Envelope::ConnectionsList { .. } => "connections_list",
            Envelope::BroadcastContent { .. } => "broadcast_content",
            Envelope::BroadcastReceived { .. } => "broadcast_received",
            Envelope::BroadcastError { .. } => "broadcast_error",
            Envelope::TextMessage { .. } => "text_message",
            Envelope::ContentUpdate { .. } => "content_update",
            Envelope::StatusUpdate { .. } => "status_update",
            Envelope::ClientDisconnect { .. } => "client_disconnect",
            Envelope::DeliveryFailed { .. } => "delivery_failed",
            Envelope::Unknown => "unknown",
        }
    }

    /// True for the identification handshake forms.
    pub fn is_identification(&self) -> bool {
        matches!(
            self,
            Envelope::ClientConnect { .. } | Envelope::AdminConnect { .. }
        )
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SigncastError::Internal(format!("envelope encode failed: {e}")))
    }
}

#[derive(Deserialize)]
struct TypeTag {
    #[serde(rename = "type")]
    ty: Option<String>,
}

/// Decode one text frame.
///
/// Fails only for malformed JSON, a missing `type`, or a known `type` whose
/// required fields are absent or mistyped.
pub fn decode(raw: &str) -> Result<Envelope> {
    let tag: TypeTag = serde_json::from_str(raw)
        .map_err(|e| SigncastError::BadRequest(format!("invalid envelope json: {e}")))?;
    let Some(ty) = tag.ty else {
        return Err(SigncastError::BadRequest("envelope missing type".into()));
    };

    let env: Envelope = serde_json::from_str(raw)
        .map_err(|e| SigncastError::BadRequest(format!("invalid {ty} envelope: {e}")))?;
    if matches!(env, Envelope::Unknown) {
        tracing::debug!(%ty, "unrecognized envelope type");
    }
    Ok(env)
}

/// Best-effort extraction of the `type` tag, for logging dropped frames.
pub fn peek_type(raw: &str) -> Option<String> {
    serde_json::from_str::<TypeTag>(raw).ok().and_then(|t| t.ty)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn identification_alias_normalizes_to_client_connect() {
        let env = decode(r#"{"type":"identification","clientId":42,"timestamp":"t"}"#).unwrap();
        match env {
            Envelope::ClientConnect { client_id, .. } => assert_eq!(client_id.as_str(), "42"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let env = decode(r#"{"type":"welcome","foo":1}"#).unwrap();
        assert_eq!(env, Envelope::Unknown);
        assert_eq!(env.kind(), "unknown");
    }

    #[test]
    fn missing_type_is_bad_request() {
        let err = decode(r#"{"client_id":1}"#).unwrap_err();
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
    }

    #[test]
    fn known_type_with_missing_fields_is_bad_request() {
        let err = decode(r#"{"type":"broadcast_content"}"#).unwrap_err();
        assert!(err.to_string().contains("broadcast_content"));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let env = decode(
            r#"{"type":"client_connect","client_id":"7","client_info":{"id":"7"}}"#,
        )
        .unwrap();
        assert!(env.is_identification());
    }

    #[test]
    fn serializes_with_type_tag_and_skips_empty_fields() {
        let s = Envelope::HeartbeatResponse { timestamp: None }.to_json().unwrap();
        assert_eq!(s, r#"{"type":"heartbeat_response"}"#);
    }

    #[test]
    fn timestamp_is_iso_utc() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn peek_type_reads_tag_only() {
        assert_eq!(peek_type(r#"{"type":"x","y":[1,2]}"#).as_deref(), Some("x"));
        assert_eq!(peek_type("not json"), None);
    }
}
