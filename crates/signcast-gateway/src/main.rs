//! signcast gateway binary.
//!
//! - WebSocket endpoint: /ws (client_connect / admin_connect handshake)
//! - Ops: /healthz, /readyz, /v1/connections
//! - Config: `SIGNCAST_CONFIG` or ./signcast.yaml

use std::net::SocketAddr;

use tracing_subscriber::{fmt, EnvFilter};

use signcast_core::error::{Result, SigncastError};
use signcast_gateway::{app_state::AppState, config};

const DEFAULT_CONFIG: &str = "signcast.yaml";

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::var("SIGNCAST_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg.gateway.listen.parse().map_err(|e| {
        SigncastError::BadRequest(format!("gateway.listen must be a socket address: {e}"))
    })?;

    let state = AppState::new(cfg)?;
    let shutdown = state.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested; draining sessions");
        shutdown.cancel();
    });

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| SigncastError::Internal(format!("bind {listen} failed: {e}")))?;
    tracing::info!(%listen, config = %path, "signcast-gateway starting");

    signcast_gateway::serve(listener, state).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
