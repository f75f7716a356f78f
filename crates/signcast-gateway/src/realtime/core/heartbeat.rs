//! Heartbeat staleness sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::ConnectionRegistry;

/// Periodically evict connections whose last heartbeat is older than `stale_after`.
///
/// Runs until `cancel` fires. Eviction happens under the registry lock, so a
/// heartbeat arriving mid-sweep either refreshes the entry first or finds it gone.
pub async fn run_heartbeat_monitor(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    stale_after: Duration,
    cancel: CancellationToken,
) {
    let threshold = chrono::Duration::from_std(stale_after)
        .unwrap_or_else(|_| chrono::Duration::seconds(45));
    let mut tick = time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; nothing can be stale yet.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let evicted = registry.evict_stale(Utc::now(), threshold);
                for conn in &evicted {
                    tracing::info!(
                        client_id = %conn.client_id,
                        role = conn.role.as_str(),
                        connection_id = %conn.connection_id,
                        last_ping = %conn.last_ping,
                        "evicting stale connection"
                    );
                }
                if !evicted.is_empty() {
                    tracing::debug!(remaining = registry.len(), "heartbeat sweep done");
                }
            }
            () = cancel.cancelled() => {
                tracing::debug!("heartbeat monitor stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::realtime::types::{ConnectionHandle, ConnectionId, Identity, Outbound};
    use signcast_core::protocol::{ClientId, CloseReason, Role};
    use tokio::sync::mpsc;

    fn identity(id: &str) -> Identity {
        Identity {
            client_id: ClientId::from(id),
            role: Role::Display,
            headquarters_id: None,
        }
    }

    #[tokio::test]
    async fn silent_connection_is_evicted_and_closed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        registry.register(
            ConnectionId::new(),
            identity("quiet"),
            ConnectionHandle::new(tx, CancellationToken::new()),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat_monitor(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_millis(50),
            cancel.clone(),
        ));

        let closed = time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(matches!(
            closed,
            Some(Outbound::Close(CloseReason::HeartbeatTimeout))
        ));
        assert!(registry.is_empty());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn touched_connection_survives() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, _rx) = mpsc::channel(4);
        registry.register(
            ConnectionId::new(),
            identity("chatty"),
            ConnectionHandle::new(tx, CancellationToken::new()),
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_heartbeat_monitor(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_millis(200),
            cancel.clone(),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_millis(30)).await;
            registry.touch(&ClientId::from("chatty"));
        }
        assert_eq!(registry.len(), 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
