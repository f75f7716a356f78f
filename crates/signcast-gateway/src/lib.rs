//! signcast gateway library entry.
//!
//! Wires the WebSocket transport, session loop, connection registry,
//! heartbeat monitor, and message router into one server. Consumed by the
//! binary (`main.rs`) and by integration tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod authz;
pub mod config;
pub mod dispatch;
pub mod ops;
pub mod realtime;
pub mod router;
pub mod transport;

use signcast_core::error::{Result, SigncastError};
use tokio::net::TcpListener;

use crate::app_state::AppState;

/// Serve the gateway on `listener` until the state's shutdown token fires.
///
/// Background tasks (heartbeat monitor, roster publisher) are spawned here
/// and stop with the same token.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let background = state.spawn_background();
    let shutdown = state.shutdown_token();
    let app = router::build_router(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| SigncastError::Internal(format!("server failed: {e}")));

    for task in background {
        task.abort();
    }
    served
}
