//! The HTTP worker: binds one accepted connection to the routing and
//! broker machinery.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DispatchError;
use crate::host::ApplicationHost;
use crate::http::request::read_request_head;
use crate::http::response::send_error_response;
use crate::net::Connection;
use crate::server::acceptor::ServerHandle;
use crate::server::worker::{Worker, WorkerFactory};

/// Deadline for reading the request head, mirroring the 15 s socket
/// send/receive timeouts of blocking-mode servers.
const HEAD_DEADLINE: Duration = Duration::from_secs(15);

/// Factory producing suspending HTTP workers.
#[derive(Default)]
pub struct HttpWorkerFactory;

impl WorkerFactory for HttpWorkerFactory {
    fn create(
        &self,
        conn: Arc<Connection>,
        reuse_count: u32,
        server: ServerHandle,
    ) -> Result<Worker, DispatchError> {
        if conn.is_closed() {
            // Reusing, and the client already went away.
            return Err(DispatchError("connection closed before dispatch".into()));
        }
        Ok(Worker::Suspending(Box::pin(run(conn, reuse_count, server))))
    }
}

/// One request's lifecycle: read the head, resolve the tenant, register
/// with its broker, cross into the context, then close or hand the
/// connection back for keep-alive reuse.
async fn run(conn: Arc<Connection>, reuse_count: u32, server: ServerHandle) {
    let head = match tokio::time::timeout(HEAD_DEADLINE, read_request_head(&conn)).await {
        Ok(Ok(head)) => head,
        Ok(Err(e)) => {
            tracing::debug!(
                connection_id = %conn.id(),
                reuse_count,
                error = %e,
                "failed to read request head"
            );
            server.finish_connection(&conn).await;
            return;
        }
        Err(_) => {
            tracing::debug!(connection_id = %conn.id(), reuse_count, "request head timed out");
            server.finish_connection(&conn).await;
            return;
        }
    };

    let port = head.port.or_else(|| server.local_port()).unwrap_or(0);
    let resolved = match server
        .routes()
        .resolve(head.host.as_deref(), port, &head.path, true)
        .await
    {
        Ok(Some(resolved)) => resolved,
        Ok(None) => {
            send_error_response(
                &conn,
                &format!(
                    "No application defined for: {}:{}{}",
                    head.host.as_deref().unwrap_or(""),
                    port,
                    head.path
                ),
            )
            .await;
            server.finish_connection(&conn).await;
            return;
        }
        Err(e) => {
            tracing::error!(connection_id = %conn.id(), error = %e, "tenant creation failed");
            send_error_response(&conn, &e.to_string()).await;
            server.finish_connection(&conn).await;
            return;
        }
    };

    let request_id = resolved.runtime.broker.register(&conn);
    tracing::debug!(
        connection_id = %conn.id(),
        request_id = %request_id,
        path_prefix = %resolved.entry.path_prefix(),
        reuse_count,
        "request handed to tenant"
    );

    resolved.runtime.host.process_request(request_id, head.clone()).await;
    resolved.runtime.broker.unregister(request_id);

    if head.keep_alive && !conn.is_closed() {
        server.reuse_connection(conn);
    } else {
        server.finish_connection(&conn).await;
    }
}
