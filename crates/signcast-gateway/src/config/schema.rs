use std::time::Duration;

use serde::Deserialize;
use signcast_core::error::{Result, SigncastError};
use signcast_core::protocol::ClientId;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SigncastError::UnsupportedVersion);
        }
        self.gateway.validate()?;
        self.authorization.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Deadline for a fresh channel to identify.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Heartbeat monitor period; also the WS ping period.
    #[serde(default = "default_heartbeat_check_interval_ms")]
    pub heartbeat_check_interval_ms: u64,

    /// A connection whose last heartbeat is older than this is evicted.
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,

    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_check_interval_ms: default_heartbeat_check_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            outbound_queue: default_outbound_queue(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=60_000).contains(&self.connect_timeout_ms) {
            return Err(SigncastError::BadRequest(
                "gateway.connect_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if !(10..=300_000).contains(&self.heartbeat_check_interval_ms) {
            return Err(SigncastError::BadRequest(
                "gateway.heartbeat_check_interval_ms must be between 10 and 300000".into(),
            ));
        }
        if self.stale_after_ms <= self.heartbeat_check_interval_ms || self.stale_after_ms > 3_600_000 {
            return Err(SigncastError::BadRequest(
                "gateway.stale_after_ms must be greater than heartbeat_check_interval_ms and at most 3600000".into(),
            ));
        }
        if !(8..=65_536).contains(&self.outbound_queue) {
            return Err(SigncastError::BadRequest(
                "gateway.outbound_queue must be between 8 and 65536".into(),
            ));
        }
        if !(256..=16 * 1024 * 1024).contains(&self.max_frame_bytes) {
            return Err(SigncastError::BadRequest(
                "gateway.max_frame_bytes must be between 256 and 16777216".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8090".into()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_heartbeat_check_interval_ms() -> u64 {
    15000
}
fn default_stale_after_ms() -> u64 {
    45000
}
fn default_outbound_queue() -> usize {
    256
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}

/// Where display identities are checked before registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMode {
    /// Every display is admitted.
    #[default]
    Open,
    /// Only `allowed_clients` are admitted.
    Static,
    /// Ask the client API (`GET {api_base_url}/api/clients/{id}`).
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub mode: AuthorizationMode,

    #[serde(default)]
    pub allowed_clients: Vec<ClientId>,

    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            mode: AuthorizationMode::default(),
            allowed_clients: Vec::new(),
            api_base_url: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl AuthorizationConfig {
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            AuthorizationMode::Open => {}
            AuthorizationMode::Static => {
                if self.allowed_clients.is_empty() {
                    return Err(SigncastError::BadRequest(
                        "authorization.allowed_clients must not be empty in static mode".into(),
                    ));
                }
            }
            AuthorizationMode::Http => {
                let ok = self
                    .api_base_url
                    .as_deref()
                    .is_some_and(|u| u.starts_with("http://") || u.starts_with("https://"));
                if !ok {
                    return Err(SigncastError::BadRequest(
                        "authorization.api_base_url must be an http(s) url in http mode".into(),
                    ));
                }
            }
        }
        if !(100..=60_000).contains(&self.request_timeout_ms) {
            return Err(SigncastError::BadRequest(
                "authorization.request_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    3000
}
