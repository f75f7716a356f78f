use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use signcast_core::protocol::{ClientId, CloseReason, ConnectionInfo, HeadquartersId, Role};
use signcast_core::session::SessionState;

use crate::realtime::types::{ConnectionHandle, ConnectionId, Identity, Outbound};

const EVENT_CAPACITY: usize = 256;

/// Snapshot of one registered channel.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headquarters_id: Option<HeadquartersId>,
    pub connected_at: DateTime<Utc>,
    pub last_ping: DateTime<Utc>,
    pub state: SessionState,
}

impl Connection {
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            client_id: self.client_id.clone(),
            role: self.role,
            headquarters_id: self.headquarters_id.clone(),
            connected_at: self.connected_at,
            last_ping: self.last_ping,
        }
    }
}

/// "Connections changed" notifications.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered {
        connection_id: ConnectionId,
        client_id: ClientId,
        role: Role,
    },
    Removed {
        connection_id: ConnectionId,
        client_id: ClientId,
        role: Role,
    },
}

struct Entry {
    conn: Connection,
    handle: ConnectionHandle,
    seq: u64,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<ConnectionId, Entry>,
    by_client: HashMap<(Role, ClientId), ConnectionId>,
    seq: u64,
}

impl RegistryInner {
    fn detach(&mut self, connection_id: &ConnectionId) -> Option<Entry> {
        let entry = self.entries.remove(connection_id)?;
        let key = (entry.conn.role, entry.conn.client_id.clone());
        if self.by_client.get(&key) == Some(connection_id) {
            self.by_client.remove(&key);
        }
        Some(entry)
    }
}

/// Live-connection directory.
///
/// All mutations go through one mutex so two sessions racing to claim the
/// same `client_id` cannot both win. At most one entry exists per
/// `(role, client_id)`; a newer registration closes the older channel.
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(RegistryInner::default()),
            events,
        }
    }

    // Maps stay consistent across a poisoning panic.
    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, ev: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(ev);
    }

    /// Insert or replace. Returns the displaced connection, already told to close.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        handle: ConnectionHandle,
    ) -> Option<Connection> {
        let now = Utc::now();
        let conn = Connection {
            connection_id,
            client_id: identity.client_id.clone(),
            role: identity.role,
            headquarters_id: identity.headquarters_id,
            connected_at: now,
            last_ping: now,
            state: SessionState::Active,
        };

        let displaced = {
            let mut g = self.lock();
            // Same channel re-registering under a new identity drops its old key.
            g.detach(&connection_id);
            let key = (identity.role, identity.client_id);
            let displaced = match g.by_client.get(&key).copied() {
                Some(prev) => g.detach(&prev),
                None => None,
            };
            g.seq += 1;
            let seq = g.seq;
            g.by_client.insert(key, connection_id);
            g.entries.insert(connection_id, Entry { conn: conn.clone(), handle, seq });
            displaced
        };

        let displaced = displaced.map(|prev| {
            tracing::info!(
                client_id = %prev.conn.client_id,
                old = %prev.conn.connection_id,
                new = %connection_id,
                "client_id re-registered; closing previous channel"
            );
            prev.handle.close(CloseReason::Replaced);
            self.emit(RegistryEvent::Removed {
                connection_id: prev.conn.connection_id,
                client_id: prev.conn.client_id.clone(),
                role: prev.conn.role,
            });
            prev.conn
        });

        self.emit(RegistryEvent::Registered {
            connection_id,
            client_id: conn.client_id,
            role: conn.role,
        });
        displaced
    }

    /// Refresh `last_ping` for every entry with this `client_id`.
    ///
    /// Unknown ids are a silent no-op. Returns whether anything was touched.
    pub fn touch(&self, client_id: &ClientId) -> bool {
        let now = Utc::now();
        let mut g = self.lock();
        let mut touched = false;
        for role in [Role::Display, Role::Admin] {
            let Some(id) = g.by_client.get(&(role, client_id.clone())).copied() else {
                continue;
            };
            if let Some(entry) = g.entries.get_mut(&id) {
                entry.conn.last_ping = entry.conn.last_ping.max(now);
                touched = true;
            }
        }
        touched
    }

    /// Refresh `last_ping` for one channel (transport-level pong).
    pub fn touch_connection(&self, connection_id: &ConnectionId) -> bool {
        let now = Utc::now();
        let mut g = self.lock();
        match g.entries.get_mut(connection_id) {
            Some(entry) => {
                entry.conn.last_ping = entry.conn.last_ping.max(now);
                true
            }
            None => false,
        }
    }

    /// Idempotent removal.
    pub fn remove(&self, connection_id: &ConnectionId) -> Option<Connection> {
        let removed = self.lock().detach(connection_id)?;
        self.emit(RegistryEvent::Removed {
            connection_id: *connection_id,
            client_id: removed.conn.client_id.clone(),
            role: removed.conn.role,
        });
        Some(removed.conn)
    }

    /// Snapshot in registration order, optionally filtered by role.
    pub fn list(&self, role: Option<Role>) -> Vec<Connection> {
        let g = self.lock();
        let mut rows: Vec<(u64, Connection)> = g
            .entries
            .values()
            .filter(|e| role.map_or(true, |r| e.conn.role == r))
            .map(|e| (e.seq, e.conn.clone()))
            .collect();
        drop(g);
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, c)| c).collect()
    }

    /// Look up by `client_id`, preferring a display entry.
    pub fn find(&self, client_id: &ClientId) -> Option<Connection> {
        self.find_role(client_id, Role::Display)
            .or_else(|| self.find_role(client_id, Role::Admin))
    }

    pub fn find_role(&self, client_id: &ClientId, role: Role) -> Option<Connection> {
        let g = self.lock();
        let id = g.by_client.get(&(role, client_id.clone()))?;
        g.entries.get(id).map(|e| e.conn.clone())
    }

    /// Enqueue onto one channel. `false` when unknown, full, or closed.
    pub fn deliver(&self, connection_id: &ConnectionId, out: Outbound) -> bool {
        let handle = {
            let g = self.lock();
            match g.entries.get(connection_id) {
                Some(e) => e.handle.clone(),
                None => return false,
            }
        };
        handle.try_send(out)
    }

    /// Remove and close every entry whose heartbeat is older than `stale_after` at `now`.
    pub fn evict_stale(&self, now: DateTime<Utc>, stale_after: ChronoDuration) -> Vec<Connection> {
        let evicted: Vec<Entry> = {
            let mut g = self.lock();
            let stale: Vec<ConnectionId> = g
                .entries
                .values()
                .filter(|e| now.signed_duration_since(e.conn.last_ping) > stale_after)
                .map(|e| e.conn.connection_id)
                .collect();
            stale.iter().filter_map(|id| g.detach(id)).collect()
        };

        evicted
            .into_iter()
            .map(|e| {
                e.handle.close(CloseReason::HeartbeatTimeout);
                self.emit(RegistryEvent::Removed {
                    connection_id: e.conn.connection_id,
                    client_id: e.conn.client_id.clone(),
                    role: e.conn.role,
                });
                e.conn
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
