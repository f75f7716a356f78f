//! Display-identity authorization.
//!
//! Consulted once per identification, before the identity is registered.
//! Admin identities are not checked here.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use signcast_core::error::{Result, SigncastError};
use signcast_core::protocol::ClientId;

use crate::config::{AuthorizationConfig, AuthorizationMode};

/// Decides whether a display `client_id` may join.
///
/// `Ok(false)` is a refusal (close 1008); `Err` means the decision could not
/// be made (close 1011, clients retry).
#[async_trait]
pub trait ClientAuthorizer: Send + Sync {
    async fn authorize(&self, client_id: &ClientId) -> Result<bool>;
}

/// Accepts every identity.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl ClientAuthorizer for AllowAll {
    async fn authorize(&self, _client_id: &ClientId) -> Result<bool> {
        Ok(true)
    }
}

/// Fixed allowlist from config.
#[derive(Debug)]
pub struct StaticAllowlist {
    allowed: HashSet<ClientId>,
}

impl StaticAllowlist {
    pub fn new(allowed: impl IntoIterator<Item = ClientId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

#[async_trait]
impl ClientAuthorizer for StaticAllowlist {
    async fn authorize(&self, client_id: &ClientId) -> Result<bool> {
        Ok(self.allowed.contains(client_id))
    }
}

#[derive(Debug, Deserialize)]
struct ClientRecord {
    #[serde(default)]
    is_allowed: bool,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClientResponse {
    Wrapped { data: ClientRecord },
    Bare(ClientRecord),
}

impl ClientResponse {
    fn into_record(self) -> ClientRecord {
        match self {
            ClientResponse::Wrapped { data } => data,
            ClientResponse::Bare(r) => r,
        }
    }
}

/// Looks the client up in the management API: `GET {base}/api/clients/{id}`.
///
/// Unknown clients (404) are refused; `is_allowed` and `is_active` must both hold.
pub struct HttpClientDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpClientDirectory {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SigncastError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ClientAuthorizer for HttpClientDirectory {
    async fn authorize(&self, client_id: &ClientId) -> Result<bool> {
        let url = format!("{}/api/clients/{}", self.base_url, client_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SigncastError::Upstream(format!("client lookup failed: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::info!(%client_id, "client unknown to directory");
            return Ok(false);
        }
        if !status.is_success() {
            return Err(SigncastError::Upstream(format!(
                "client lookup returned {status}"
            )));
        }

        let record = resp
            .json::<ClientResponse>()
            .await
            .map_err(|e| SigncastError::Upstream(format!("invalid client record: {e}")))?
            .into_record();
        tracing::debug!(%client_id, is_allowed = record.is_allowed, is_active = record.is_active, "client record");
        Ok(record.is_allowed && record.is_active)
    }
}

/// Build the authorizer selected by `authorization.mode`.
pub fn from_config(cfg: &AuthorizationConfig) -> Result<Arc<dyn ClientAuthorizer>> {
    Ok(match cfg.mode {
        AuthorizationMode::Open => Arc::new(AllowAll),
        AuthorizationMode::Static => Arc::new(StaticAllowlist::new(cfg.allowed_clients.clone())),
        AuthorizationMode::Http => {
            let base = cfg.api_base_url.as_deref().ok_or_else(|| {
                SigncastError::BadRequest("authorization.api_base_url required in http mode".into())
            })?;
            Arc::new(HttpClientDirectory::new(base, cfg.request_timeout())?)
        }
    })
}
