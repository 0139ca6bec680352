//! Request broker: the one sanctioned crossing point between a tenant's
//! isolated execution context and acceptor-side connection state.
//!
//! A worker registers its connection here immediately before crossing into
//! the tenant, and hands the resulting opaque [`RequestId`] across the
//! boundary instead of any raw handle. Every operation the tenant performs
//! on the connection comes back through this broker, keyed by that id.
//!
//! The broker never owns a connection: it holds weak associations only, and
//! the acceptor side remains responsible for closing the socket. A lookup
//! miss ([`BrokerError::UnknownRequestId`]) legitimately occurs when the
//! connection was already torn down and means end-of-request, not a fault.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::BrokerError;
use crate::net::Connection;

/// Opaque identifier correlating one broker registration with exactly one
/// in-flight connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-tenant registry of in-flight requests.
#[derive(Default)]
pub struct RequestBroker {
    requests: DashMap<RequestId, Weak<Connection>>,
}

impl RequestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a connection with a fresh request id.
    ///
    /// Safe for concurrent invocation from multiple workers.
    pub fn register(&self, conn: &Arc<Connection>) -> RequestId {
        let id = RequestId::new();
        self.requests.insert(id, Arc::downgrade(conn));
        id
    }

    /// Remove the association at end-of-request. Idempotent.
    pub fn unregister(&self, id: RequestId) {
        self.requests.remove(&id);
    }

    /// Number of in-flight registrations.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn lookup(&self, id: RequestId) -> Result<Arc<Connection>, BrokerError> {
        let weak = self
            .requests
            .get(&id)
            .ok_or(BrokerError::UnknownRequestId)?
            .clone();
        match weak.upgrade() {
            Some(conn) if !conn.is_closed() => Ok(conn),
            _ => {
                // Acceptor side already tore the connection down; drop the
                // stale entry so later lookups short-circuit.
                self.requests.remove(&id);
                Err(BrokerError::UnknownRequestId)
            }
        }
    }

    /// Read request bytes on behalf of the tenant.
    pub async fn read(&self, id: RequestId, buf: &mut [u8]) -> Result<usize, BrokerError> {
        let conn = self.lookup(id)?;
        conn.read(buf).await.map_err(|_| BrokerError::UnknownRequestId)
    }

    /// Write response bytes on behalf of the tenant.
    pub async fn write(&self, id: RequestId, data: &[u8]) -> Result<(), BrokerError> {
        let conn = self.lookup(id)?;
        conn.write_all(data).await.map_err(|_| BrokerError::UnknownRequestId)
    }

    pub async fn flush(&self, id: RequestId) -> Result<(), BrokerError> {
        let conn = self.lookup(id)?;
        conn.flush().await.map_err(|_| BrokerError::UnknownRequestId)
    }

    /// Query the client address for a request.
    pub fn peer_addr(&self, id: RequestId) -> Result<Option<SocketAddr>, BrokerError> {
        Ok(self.lookup(id)?.peer_addr())
    }

    /// Signal completion: close the connection and drop the association.
    pub async fn close(&self, id: RequestId) -> Result<(), BrokerError> {
        let conn = self.lookup(id)?;
        conn.close().await;
        self.requests.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn pipe_conn() -> (tokio::io::DuplexStream, Arc<Connection>) {
        let (client, server) = tokio::io::duplex(1024);
        (client, Arc::new(Connection::new(Box::new(server), None)))
    }

    #[tokio::test]
    async fn register_forward_unregister_round_trip() {
        let broker = RequestBroker::new();
        let (mut client, conn) = pipe_conn();

        let id = broker.register(&conn);
        broker.write(id, b"payload").await.unwrap();

        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"payload");

        broker.unregister(id);
        assert_eq!(
            broker.write(id, b"late").await,
            Err(BrokerError::UnknownRequestId)
        );
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let broker = RequestBroker::new();
        let (_client, conn) = pipe_conn();
        let id = broker.register(&conn);
        broker.unregister(id);
        broker.unregister(id);
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn dropped_connection_reads_as_unknown_id() {
        let broker = RequestBroker::new();
        let (_client, conn) = pipe_conn();
        let id = broker.register(&conn);

        // The acceptor side is the sole owner; once it drops the connection
        // the weak association must stop resolving.
        drop(conn);
        let mut buf = [0u8; 4];
        assert_eq!(broker.read(id, &mut buf).await, Err(BrokerError::UnknownRequestId));
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn closed_connection_reads_as_unknown_id() {
        let broker = RequestBroker::new();
        let (_client, conn) = pipe_conn();
        let id = broker.register(&conn);

        conn.close().await;
        assert_eq!(broker.peer_addr(id), Err(BrokerError::UnknownRequestId));
    }

    #[tokio::test]
    async fn ids_are_distinct_across_registrations() {
        let broker = RequestBroker::new();
        let (_c1, conn1) = pipe_conn();
        let (_c2, conn2) = pipe_conn();
        assert_ne!(broker.register(&conn1), broker.register(&conn2));
    }
}
