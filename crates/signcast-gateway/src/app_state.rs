//! Shared application state for the signcast gateway.
//!
//! Cheap to clone; every session task holds one.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use signcast_core::error::Result;
use signcast_core::protocol::{CloseReason, Role};

use crate::authz::{self, ClientAuthorizer};
use crate::config::GatewayConfig;
use crate::dispatch::{run_roster_publisher, MessageRouter};
use crate::realtime::{run_heartbeat_monitor, ConnectionRegistry, Identity};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: GatewayConfig,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    authorizer: Arc<dyn ClientAuthorizer>,
    shutdown: CancellationToken,
}

impl AppState {
    /// Build application state with the authorizer named in config.
    pub fn new(cfg: GatewayConfig) -> Result<Self> {
        let authorizer = authz::from_config(&cfg.authorization)?;
        Ok(Self::with_authorizer(cfg, authorizer))
    }

    pub fn with_authorizer(cfg: GatewayConfig, authorizer: Arc<dyn ClientAuthorizer>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                router,
                authorizer,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn cfg(&self) -> &GatewayConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.inner.router)
    }

    /// Root token; cancelling it drains every session and background task.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Gate an identity before registration.
    pub async fn authorize(&self, identity: &Identity) -> std::result::Result<(), CloseReason> {
        if identity.role == Role::Admin {
            return Ok(());
        }
        match self.inner.authorizer.authorize(&identity.client_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CloseReason::Rejected(format!(
                "client {} is not allowed",
                identity.client_id
            ))),
            Err(e) => {
                tracing::error!(client_id = %identity.client_id, error = %e, "authorization unavailable");
                Err(CloseReason::Internal(e.to_string()))
            }
        }
    }

    /// Start the heartbeat monitor and roster publisher.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let gw = &self.cfg().gateway;
        let events = self.inner.registry.subscribe();
        vec![
            tokio::spawn(run_heartbeat_monitor(
                self.registry(),
                gw.heartbeat_check_interval(),
                gw.stale_after(),
                self.shutdown_token(),
            )),
            tokio::spawn(run_roster_publisher(
                self.router(),
                events,
                self.shutdown_token(),
            )),
        ]
    }
}
