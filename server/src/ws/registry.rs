//! Connection registry: the authoritative map from client id to live connection.
//!
//! Backed by a `DashMap` so lookups from routing and job tasks never wait on a
//! global lock. At most one connection is held per id at any instant.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::ws::connection::ConnectionHandle;
use crate::ws::{ClientId, CLOSE_REPLACED};

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ClientId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` under `id`, closing any connection it supersedes.
    ///
    /// The old connection is closed while its map entry is still locked, so no
    /// other task can observe both connections registered. Returns whether an
    /// old connection was evicted.
    pub fn register(&self, id: ClientId, conn: ConnectionHandle) -> bool {
        match self.connections.entry(id) {
            Entry::Occupied(mut entry) => {
                let old = entry.insert(conn);
                if let Err(e) = old.close(CLOSE_REPLACED, "replaced") {
                    tracing::debug!(
                        client_id = %entry.key(),
                        serial = old.serial(),
                        error = %e,
                        "Failed to close replaced connection"
                    );
                }
                tracing::info!(
                    client_id = %entry.key(),
                    old_serial = old.serial(),
                    new_serial = entry.get().serial(),
                    "Connection replaced"
                );
                true
            }
            Entry::Vacant(entry) => {
                tracing::debug!(
                    client_id = %entry.key(),
                    serial = conn.serial(),
                    "Connection registered"
                );
                entry.insert(conn);
                false
            }
        }
    }

    pub fn lookup(&self, id: &ClientId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Remove `id` only if `conn` is still the registered holder.
    pub fn remove(&self, id: &ClientId, conn: &ConnectionHandle) -> bool {
        let removed = self
            .connections
            .remove_if(id, |_, current| Arc::ptr_eq(current, conn))
            .is_some();
        if removed {
            tracing::debug!(client_id = %id, serial = conn.serial(), "Connection unregistered");
        }
        removed
    }

    /// Sorted snapshot of the registered ids.
    pub fn list_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of every registered connection.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
