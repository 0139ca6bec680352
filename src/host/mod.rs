//! Tenant execution contexts.
//!
//! Each tenant runs its request pipeline in an isolated execution context
//! reachable only through the request broker indirection: the server hands
//! it a [`RequestId`] and already-read request data, never a socket. The
//! original design put the context behind a hard memory/fault boundary;
//! here the boundary is explicit message passing, so a context can live on
//! an in-process task today and behind a pipe or local socket later without
//! changing the broker contract.

pub mod channel;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::broker::{RequestBroker, RequestId};
use crate::error::DispatchError;
use crate::http::RequestHead;
use crate::routing::RouteEntry;

static HOST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one created execution context, used for unload notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(u64);

impl HostId {
    pub fn new() -> Self {
        Self(HOST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

/// A tenant's isolated execution context.
///
/// Implementations act on connections exclusively through their broker,
/// keyed by the request id; [`UnknownRequestId`](crate::error::BrokerError)
/// from any broker call means end-of-request, not a fault.
pub trait ApplicationHost: Send + Sync {
    fn id(&self) -> HostId;

    /// Execute the tenant pipeline for one request.
    ///
    /// Resolves at end-of-request; the caller then unregisters the id and
    /// decides between connection close and keep-alive reuse.
    fn process_request(&self, id: RequestId, head: RequestHead) -> BoxFuture<'static, ()>;

    /// Tear the context down.
    ///
    /// Fire-and-forget: in-flight requests may be abandoned without a
    /// reply. The context notifies its unload handle when it is gone.
    fn unload(&self);
}

/// A created tenant runtime: the context plus the broker bound to it.
#[derive(Clone)]
pub struct TenantRuntime {
    pub host: Arc<dyn ApplicationHost>,
    pub broker: Arc<RequestBroker>,
}

/// Callback a context invokes when it is being torn down; routes to
/// [`RouteTable::unregister`](crate::routing::RouteTable::unregister).
pub trait UnloadNotifier: Send + Sync {
    fn notify(&self, host: HostId);
}

/// Produces a tenant's execution context and its request broker.
///
/// Invoked exactly once per route entry, lazily, under the entry's
/// exclusive creation slot.
pub trait HostFactory: Send + Sync {
    fn create_host(
        &self,
        entry: &RouteEntry,
        on_unload: Arc<dyn UnloadNotifier>,
    ) -> Result<TenantRuntime, DispatchError>;
}
