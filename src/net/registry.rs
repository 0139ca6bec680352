//! Registry of open connections, used only for coordinated shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::net::connection::{Connection, ConnectionId};

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    shutting_down: bool,
}

/// Process-wide set of currently-open accepted connections.
///
/// Membership is added on accept and removed on close. Once the shutdown
/// sweep begins, removals become no-ops so the sweep enumerates a stable
/// set, and new registrations are refused.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an accepted connection.
    ///
    /// Returns `false` once shutdown has begun; the caller must close the
    /// connection instead of dispatching it.
    pub fn add(&self, conn: Arc<Connection>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutting_down {
            return false;
        }
        inner.connections.insert(conn.id(), conn);
        true
    }

    /// Remove a connection on close. No-op while shutting down.
    pub fn remove(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shutting_down {
            return;
        }
        inner.connections.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }

    /// Mark the registry as shutting down and close every member.
    ///
    /// Best-effort: each connection is half-closed then closed with all
    /// errors swallowed; partial failures never abort the sweep.
    pub async fn shutdown_all(&self) {
        let connections: Vec<Arc<Connection>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.shutting_down = true;
            inner.connections.values().cloned().collect()
        };

        for conn in connections {
            tracing::trace!(connection_id = %conn.id(), "closing connection on shutdown");
            conn.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_conn() -> Arc<Connection> {
        let (_client, server) = tokio::io::duplex(64);
        // Leak the client side so the pipe stays open for the test's duration.
        std::mem::forget(_client);
        Arc::new(Connection::new(Box::new(server), None))
    }

    #[tokio::test]
    async fn add_and_remove() {
        let registry = ConnectionRegistry::new();
        let conn = make_conn();
        let id = conn.id();

        assert!(registry.add(conn));
        assert_eq!(registry.len(), 1);

        registry.remove(id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_every_member() {
        let registry = ConnectionRegistry::new();
        let a = make_conn();
        let b = make_conn();
        registry.add(a.clone());
        registry.add(b.clone());

        registry.shutdown_all().await;

        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn shutdown_gates_registration_and_removal() {
        let registry = ConnectionRegistry::new();
        let existing = make_conn();
        let existing_id = existing.id();
        registry.add(existing);

        assert!(!registry.is_shutting_down());
        registry.shutdown_all().await;
        assert!(registry.is_shutting_down());

        // New accepts must be refused.
        assert!(!registry.add(make_conn()));
        // Removal is a no-op so the shutdown set stays stable.
        registry.remove(existing_id);
        assert_eq!(registry.len(), 1);
    }
}
