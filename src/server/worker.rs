//! Worker construction seam.
//!
//! The protocol layer is a collaborator: given an accepted connection it
//! produces a worker able to read enough of the request to resolve
//! routing. The server only cares whether the worker can suspend while
//! waiting on a tenant's response.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::DispatchError;
use crate::net::Connection;
use crate::server::acceptor::ServerHandle;

/// One accepted connection's unit of work.
pub enum Worker {
    /// Can yield while waiting on the tenant context; runs as a spawned
    /// task on the accept runtime.
    Suspending(BoxFuture<'static, ()>),
    /// Cannot suspend; runs on the bounded blocking pool.
    Pooled(Box<dyn FnOnce() + Send + 'static>),
}

impl Worker {
    pub fn supports_suspension(&self) -> bool {
        matches!(self, Worker::Suspending(_))
    }
}

/// Produces a worker for each accepted (or reused) connection.
pub trait WorkerFactory: Send + Sync {
    /// `reuse_count` is 0 for a fresh connection and counts keep-alive
    /// re-entries after that. Failure means the connection is forcibly
    /// closed and never retried.
    fn create(
        &self,
        conn: Arc<Connection>,
        reuse_count: u32,
        server: ServerHandle,
    ) -> Result<Worker, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_suspending_workers_support_suspension() {
        let suspending = Worker::Suspending(Box::pin(async {}));
        assert!(suspending.supports_suspension());

        let pooled = Worker::Pooled(Box::new(|| {}));
        assert!(!pooled.supports_suspension());
    }
}
