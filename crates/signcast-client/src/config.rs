//! Client config loader (strict parsing).

use std::fs;
use std::time::Duration;

use serde::Deserialize;

use signcast_core::error::{Result, SigncastError};
use signcast_core::protocol::{ClientId, HeadquartersId, Role};

use crate::backoff::{ReconnectPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub version: u32,

    /// Channel endpoint, e.g. `ws://localhost:8090/ws`.
    pub url: String,

    pub client_id: ClientId,

    #[serde(default = "default_role")]
    pub role: Role,

    /// Site this display belongs to (site broadcasts).
    #[serde(default)]
    pub headquarters_id: Option<HeadquartersId>,

    /// Deadline for open + identification acknowledgement.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    /// Management API used to resolve content by id.
    #[serde(default)]
    pub content_api_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=60_000).contains(&self.base_delay_ms) {
            return Err(SigncastError::BadRequest(
                "reconnect.base_delay_ms must be 1..=60000".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms || self.max_delay_ms > 600_000 {
            return Err(SigncastError::BadRequest(
                "reconnect.max_delay_ms must be >= base_delay_ms and <= 600000".into(),
            ));
        }
        if !(1..=100).contains(&self.max_attempts) {
            return Err(SigncastError::BadRequest(
                "reconnect.max_attempts must be 1..=100".into(),
            ));
        }
        Ok(())
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}

impl ClientConfig {
    /// Display-role config with defaults, mostly for tests and embedding.
    pub fn display(url: impl Into<String>, client_id: impl Into<ClientId>) -> Self {
        Self {
            version: 1,
            url: url.into(),
            client_id: client_id.into(),
            role: Role::Display,
            headquarters_id: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect: ReconnectSection::default(),
            content_api_base_url: None,
        }
    }

    pub fn admin(url: impl Into<String>, client_id: impl Into<ClientId>) -> Self {
        Self {
            role: Role::Admin,
            ..Self::display(url, client_id)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SigncastError::UnsupportedVersion);
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SigncastError::BadRequest("url must be ws:// or wss://".into()));
        }
        if self.client_id.is_blank() {
            return Err(SigncastError::BadRequest("client_id must not be empty".into()));
        }
        if !(100..=60_000).contains(&self.connect_timeout_ms) {
            return Err(SigncastError::BadRequest(
                "connect_timeout_ms must be 100..=60000".into(),
            ));
        }
        if !(10..=600_000).contains(&self.heartbeat_interval_ms) {
            return Err(SigncastError::BadRequest(
                "heartbeat_interval_ms must be 10..=600000".into(),
            ));
        }
        if let Some(base) = &self.content_api_base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(SigncastError::BadRequest(
                    "content_api_base_url must be http(s)".into(),
                ));
            }
        }
        self.reconnect.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

pub fn load_from_file(path: &str) -> Result<ClientConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| SigncastError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig = serde_yaml::from_str(s)
        .map_err(|e| SigncastError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

fn default_role() -> Role {
    Role::Display
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
