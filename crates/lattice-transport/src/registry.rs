//! Concurrent connection registry.

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::{Connection, ConnectionId};

/// Mapping from connection identity to its [`Connection`].
///
/// Entries are inserted exactly once per accepted channel and removed exactly
/// once on close. Insert, remove, and iteration are safe under concurrent
/// access without external locking; iteration order is unspecified.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under its own id.
    pub fn insert(&self, connection: Connection) {
        self.connections.insert(connection.id(), connection);
    }

    /// Removes and returns the connection registered under `id`.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id).map(|(_, connection)| connection)
    }

    /// Looks up a connection by id.
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry holds no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of the registered connections, used to fan out close-all.
    pub fn connections(&self) -> Vec<Connection> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
